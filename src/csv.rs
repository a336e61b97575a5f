pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits CSV text into records. Quoted fields may span lines; each record carries the
/// 1-based line number it starts on. Blank lines are skipped.
pub fn parse_csv(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut out = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line_no = 1usize;
    let mut record_start = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut buf));
                if !(fields.len() == 1 && fields[0].trim().is_empty()) {
                    out.push((record_start, std::mem::take(&mut fields)));
                }
                fields.clear();
                line_no += 1;
                record_start = line_no;
            }
            '\n' => {
                buf.push(ch);
                line_no += 1;
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        if !(fields.len() == 1 && fields[0].trim().is_empty()) {
            out.push((record_start, fields));
        }
    }
    out
}
