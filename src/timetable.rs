//! Day × slot projection of flat period assignments.
//!
//! This builds lookup tables only. It does not schedule, and it does not reject a
//! teacher booked into two classes at once; the teacher view reports such clashes.

use std::collections::HashMap;

use serde::Serialize;

pub const DEFAULT_WORKING_DAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAssignment {
    pub id: String,
    pub day: String,
    pub slot_name: String,
    pub class_name: String,
    pub teacher_name: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimetableView {
    Class(String),
    Teacher(String),
}

impl TimetableView {
    pub fn parse(view: &str, name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        match view.trim().to_ascii_lowercase().as_str() {
            "class" => Some(TimetableView::Class(name.to_string())),
            "teacher" => Some(TimetableView::Teacher(name.to_string())),
            _ => None,
        }
    }

    fn selects(&self, a: &PeriodAssignment) -> bool {
        match self {
            TimetableView::Class(c) => a.class_name.eq_ignore_ascii_case(c),
            TimetableView::Teacher(t) => a.teacher_name.eq_ignore_ascii_case(t),
        }
    }

    fn counterpart<'a>(&self, a: &'a PeriodAssignment) -> &'a str {
        match self {
            TimetableView::Class(_) => &a.teacher_name,
            TimetableView::Teacher(_) => &a.class_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEntry {
    pub assignment_id: String,
    pub subject: String,
    pub counterpart: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clash {
    pub day: String,
    pub slot_name: String,
    pub kept: String,
    pub dropped: String,
}

#[derive(Debug, Default)]
pub struct Projection {
    pub cells: HashMap<(String, String), CellEntry>,
    pub clashes: Vec<Clash>,
}

impl Projection {
    pub fn lookup(&self, day: &str, slot: &str) -> Option<&CellEntry> {
        self.cells.get(&(day.to_string(), slot.to_string()))
    }
}

/// Single pass over `assignments`, keeping the first entry per (day, slot).
pub fn project(assignments: &[PeriodAssignment], view: &TimetableView) -> Projection {
    let mut out = Projection::default();
    for a in assignments.iter().filter(|a| view.selects(a)) {
        let key = (a.day.clone(), a.slot_name.clone());
        match out.cells.get(&key) {
            Some(existing) => out.clashes.push(Clash {
                day: a.day.clone(),
                slot_name: a.slot_name.clone(),
                kept: existing.counterpart.clone(),
                dropped: view.counterpart(a).to_string(),
            }),
            None => {
                out.cells.insert(
                    key,
                    CellEntry {
                        assignment_id: a.id.clone(),
                        subject: a.subject.clone(),
                        counterpart: view.counterpart(a).to_string(),
                    },
                );
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GridCell {
    Break,
    Free,
    Assigned(CellEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub day: String,
    pub cells: Vec<GridSlotCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSlotCell {
    pub slot_name: String,
    pub cell: GridCell,
}

/// Expands a projection into a full working-day × slot grid.
pub fn grid(days: &[String], slots: &[TimeSlot], projection: &Projection) -> Vec<GridRow> {
    days.iter()
        .map(|day| GridRow {
            day: day.clone(),
            cells: slots
                .iter()
                .map(|slot| GridSlotCell {
                    slot_name: slot.name.clone(),
                    cell: if slot.is_break {
                        GridCell::Break
                    } else {
                        match projection.lookup(day, &slot.name) {
                            Some(entry) => GridCell::Assigned(entry.clone()),
                            None => GridCell::Free,
                        }
                    },
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(id: &str, day: &str, slot: &str, class: &str, teacher: &str, subject: &str) -> PeriodAssignment {
        PeriodAssignment {
            id: id.into(),
            day: day.into(),
            slot_name: slot.into(),
            class_name: class.into(),
            teacher_name: teacher.into(),
            subject: subject.into(),
        }
    }

    fn slot(name: &str, is_break: bool) -> TimeSlot {
        TimeSlot {
            name: name.into(),
            start_time: None,
            end_time: None,
            is_break,
        }
    }

    fn fixture() -> Vec<PeriodAssignment> {
        vec![
            pa("1", "Monday", "P1", "5A", "Mr Rao", "Maths"),
            pa("2", "Monday", "P2", "5A", "Ms Iyer", "English"),
            pa("3", "Monday", "P1", "5B", "Ms Iyer", "English"),
            pa("4", "Tuesday", "P1", "5B", "Mr Rao", "Maths"),
        ]
    }

    #[test]
    fn class_view_maps_cells_to_teacher() {
        let p = project(&fixture(), &TimetableView::Class("5A".into()));
        let cell = p.lookup("Monday", "P1").expect("populated");
        assert_eq!(cell.subject, "Maths");
        assert_eq!(cell.counterpart, "Mr Rao");
        assert!(p.lookup("Tuesday", "P1").is_none());
        assert_eq!(p.cells.len(), 2);
    }

    #[test]
    fn teacher_view_maps_cells_to_class() {
        let p = project(&fixture(), &TimetableView::Teacher("mr rao".into()));
        assert_eq!(p.lookup("Monday", "P1").expect("cell").counterpart, "5A");
        assert_eq!(p.lookup("Tuesday", "P1").expect("cell").counterpart, "5B");
        assert!(p.lookup("Monday", "P2").is_none());
        assert!(p.clashes.is_empty());
    }

    #[test]
    fn double_booked_teacher_keeps_first_and_reports_clash() {
        let mut rows = fixture();
        rows.push(pa("5", "Monday", "P1", "6A", "Mr Rao", "Maths"));
        let p = project(&rows, &TimetableView::Teacher("Mr Rao".into()));
        assert_eq!(p.lookup("Monday", "P1").expect("cell").counterpart, "5A");
        assert_eq!(p.clashes.len(), 1);
        assert_eq!(p.clashes[0].dropped, "6A");
    }

    #[test]
    fn grid_marks_breaks_and_free_cells() {
        let p = project(&fixture(), &TimetableView::Class("5A".into()));
        let days = vec!["Monday".to_string(), "Tuesday".to_string()];
        let slots = vec![slot("P1", false), slot("Recess", true), slot("P2", false)];
        let g = grid(&days, &slots, &p);
        assert_eq!(g.len(), 2);
        assert!(matches!(g[0].cells[0].cell, GridCell::Assigned(_)));
        assert_eq!(g[0].cells[1].cell, GridCell::Break);
        assert_eq!(g[1].cells[0].cell, GridCell::Free);
    }

    #[test]
    fn view_parse_rejects_blank_names() {
        assert!(TimetableView::parse("class", "  ").is_none());
        assert!(TimetableView::parse("room", "5A").is_none());
        assert_eq!(
            TimetableView::parse("Teacher", "Ms Iyer"),
            Some(TimetableView::Teacher("Ms Iyer".into()))
        );
    }
}
