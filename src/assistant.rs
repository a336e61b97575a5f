//! Admin help assistant: a keyword knowledge table with an optional remote model.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub title: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    pub source: &'static str,
}

struct KnowledgeEntry {
    keywords: &'static [&'static str],
    title: &'static str,
    response: &'static str,
    steps: &'static [&'static str],
}

// Scanned in order; more specific entries come first.
static KNOWLEDGE: &[KnowledgeEntry] = &[
    KnowledgeEntry {
        keywords: &["add", "student"],
        title: "Adding a New Student",
        response: "To add a new student, open Students and use the Add Student form. First and last name are required; link the student to a class so they show up in attendance and fees.",
        steps: &[
            "Open the Students page",
            "Click \"Add Student\"",
            "Fill in first name, last name and class",
            "Optionally link a parent record",
            "Save",
        ],
    },
    KnowledgeEntry {
        keywords: &["add", "teacher"],
        title: "Adding a New Teacher",
        response: "Teachers are added from the Teachers page. Their name is what the timetable uses, so keep it consistent with period assignments.",
        steps: &[
            "Open the Teachers page",
            "Click \"Add Teacher\"",
            "Enter name, subject and contact details",
            "Save",
        ],
    },
    KnowledgeEntry {
        keywords: &["add", "staff"],
        title: "Adding Staff Members",
        response: "Non-teaching staff are managed on the Staff page. A role is required for every staff member.",
        steps: &[
            "Open the Staff page",
            "Click \"Add Staff\"",
            "Enter name and role",
            "Save",
        ],
    },
    KnowledgeEntry {
        keywords: &["fee", "template"],
        title: "Creating a Fee Template",
        response: "Fee templates bundle line items such as tuition and transport. The total is calculated from the items, and templates can be assigned to a whole class at once.",
        steps: &[
            "Open Fees > Templates",
            "Click \"New Template\"",
            "Add line items with amounts",
            "Save, then use \"Assign\" to bill a class",
        ],
    },
    KnowledgeEntry {
        keywords: &["late", "fee"],
        title: "Applying Late Fees",
        response: "Late fees are charged once per overdue record after the grace period configured in Setup > Fees, as a fixed amount or a percentage of the balance.",
        steps: &[
            "Check the late fee settings in Setup > Fees",
            "Open Fees > Late Fees",
            "Click \"Apply Late Fees\"",
        ],
    },
    KnowledgeEntry {
        keywords: &["cheque"],
        title: "Managing Post-Dated Cheques",
        response: "Record each post-dated cheque against the student's fee. When the bank confirms, mark it Cleared to post the payment, or Bounced to add the bounce charge.",
        steps: &[
            "Open Fees > PDC",
            "Record cheque number, bank, amount and date",
            "Mark as Cleared or Bounced when the bank responds",
        ],
    },
    KnowledgeEntry {
        keywords: &["collect", "fee"],
        title: "Collecting a Fee Payment",
        response: "Payments are collected against a student's fee record. Partial payments are allowed; the balance and status update automatically and a receipt is available for each payment.",
        steps: &[
            "Open Fees > Collect",
            "Search for the student",
            "Choose the fee record and enter the amount",
            "Select the payment method and save",
            "Print the receipt",
        ],
    },
    KnowledgeEntry {
        keywords: &["attendance"],
        title: "Marking Attendance",
        response: "Attendance is marked per class and date. Every student starts unmarked; choose Present, Absent, Late or Excused and save the sheet.",
        steps: &[
            "Open Attendance",
            "Pick the class and date",
            "Set a status for each student",
            "Save",
        ],
    },
    KnowledgeEntry {
        keywords: &["timetable"],
        title: "Building the Timetable",
        response: "Define time slots (including breaks) and working days first, then assign a subject and teacher to each class period. Switch between class and teacher views to review.",
        steps: &[
            "Open Timetable > Time Slots and add periods",
            "Confirm the working days",
            "Open the class grid and click \"Add\" on a free cell",
            "Choose subject and teacher",
        ],
    },
    KnowledgeEntry {
        keywords: &["academic", "year"],
        title: "Starting a New Academic Year",
        response: "A new academic year becomes the current one immediately. You can copy classes and fee templates from a previous year. Years can only be created once the configured cooldown has passed.",
        steps: &[
            "Open Setup > Academic Years",
            "Click \"New Academic Year\"",
            "Optionally pick a template year and what to copy",
            "Confirm",
        ],
    },
    KnowledgeEntry {
        keywords: &["exam"],
        title: "Scheduling an Exam",
        response: "Exams are scheduled per class with a date, time and maximum marks. Upcoming exams appear on the academics dashboard.",
        steps: &[
            "Open Academics > Exams",
            "Click \"Schedule Exam\"",
            "Choose class, subject, date and time",
            "Save",
        ],
    },
    KnowledgeEntry {
        keywords: &["parent"],
        title: "Managing Parents",
        response: "Parent records hold contact details and can be linked from a student record. A phone number is required.",
        steps: &[
            "Open the Parents page",
            "Click \"Add Parent\"",
            "Enter name and phone",
            "Link the parent from the student's record",
        ],
    },
    KnowledgeEntry {
        keywords: &["export"],
        title: "Exporting Data",
        response: "Any list can be exported as CSV, and fee records have their own export with balances and statuses.",
        steps: &[
            "Open the list you want to export",
            "Apply filters if needed",
            "Click \"Export CSV\"",
        ],
    },
];

static DEFAULT_RESPONSES: &[&str] = &[
    "I can help with students, teachers, staff, fees, attendance, timetables and academic years. Could you rephrase your question?",
    "I'm not sure about that one. Try asking how to add a student, collect a fee or build the timetable.",
    "That isn't something I know yet. The admin guide covers fees, attendance and academic-year setup in detail.",
];

/// Matches the question against the knowledge table, or picks a default reply.
pub fn keyword_answer(question: &str) -> Answer {
    let q = question.to_lowercase();
    for entry in KNOWLEDGE {
        if entry.keywords.iter().all(|k| q.contains(k)) {
            return Answer {
                response: entry.response.to_string(),
                preview: Some(Preview {
                    title: entry.title.to_string(),
                    steps: entry.steps.iter().map(|s| s.to_string()).collect(),
                }),
                source: "keyword",
            };
        }
    }
    let idx = q.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize)) % DEFAULT_RESPONSES.len();
    Answer {
        response: DEFAULT_RESPONSES[idx].to_string(),
        preview: None,
        source: "keyword",
    }
}

pub fn default_responses() -> &'static [&'static str] {
    DEFAULT_RESPONSES
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant endpoint is not configured")]
    NotConfigured,
    #[error("remote assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote assistant returned no answer")]
    EmptyAnswer,
}

pub trait AssistantBackend {
    fn ask(&self, question: &str) -> Result<Answer, AssistantError>;
}

pub struct KeywordAssistant;

impl AssistantBackend for KeywordAssistant {
    fn ask(&self, question: &str) -> Result<Answer, AssistantError> {
        Ok(keyword_answer(question))
    }
}

/// Chat-completion style remote model; falls back to keywords on any failure.
pub struct RemoteAssistant {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

const SYSTEM_PROMPT: &str = "You are an assistant for school administrators using a school management system. Answer briefly and practically.";

impl RemoteAssistant {
    pub fn from_settings(section: &serde_json::Value, api_key: Option<String>) -> Self {
        Self {
            endpoint: section
                .get("endpoint")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            model: section
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            api_key,
            timeout: Duration::from_secs(
                section
                    .get("timeoutSeconds")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(20),
            ),
        }
    }

    fn ask_remote(&self, question: &str) -> Result<String, AssistantError> {
        if self.endpoint.is_empty() {
            return Err(AssistantError::NotConfigured);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": question }
            ]
        });
        let mut request = client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let value: serde_json::Value = request.send()?.error_for_status()?.json()?;
        extract_text(&value).ok_or(AssistantError::EmptyAnswer)
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    let text = value
        .pointer("/choices/0/message/content")
        .or_else(|| value.get("response"))
        .and_then(|v| v.as_str())?
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl AssistantBackend for RemoteAssistant {
    fn ask(&self, question: &str) -> Result<Answer, AssistantError> {
        match self.ask_remote(question) {
            Ok(response) => Ok(Answer {
                response,
                preview: keyword_answer(question).preview,
                source: "remote",
            }),
            Err(e) => {
                tracing::warn!(error = %e, "remote assistant failed; answering from keywords");
                let mut answer = keyword_answer(question);
                answer.source = "fallback";
                Ok(answer)
            }
        }
    }
}
