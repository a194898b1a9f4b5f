use serde::{Deserialize, Serialize};

/// Target job role the interview is tailored to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobRole {
    #[default]
    SoftwareEngineer,
    DataScientist,
    ProductManager,
    UxDesigner,
    MarketingManager,
    Other(String),
}

impl JobRole {
    pub const KNOWN: [JobRole; 5] = [
        JobRole::SoftwareEngineer,
        JobRole::DataScientist,
        JobRole::ProductManager,
        JobRole::UxDesigner,
        JobRole::MarketingManager,
    ];

    pub fn title(&self) -> &str {
        match self {
            JobRole::SoftwareEngineer => "Software Engineer",
            JobRole::DataScientist => "Data Scientist",
            JobRole::ProductManager => "Product Manager",
            JobRole::UxDesigner => "UX Designer",
            JobRole::MarketingManager => "Marketing Manager",
            JobRole::Other(title) => title,
        }
    }
}

impl From<&str> for JobRole {
    /// Accepts titles ("Data Scientist") and slugs ("data-scientist", "ux_designer")
    fn from(value: &str) -> Self {
        let key: String = value
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        JobRole::KNOWN
            .into_iter()
            .find(|role| {
                role.title()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .eq(key.chars())
            })
            .unwrap_or_else(|| JobRole::Other(value.trim().to_string()))
    }
}

impl From<String> for JobRole {
    fn from(value: String) -> Self {
        JobRole::from(value.as_str())
    }
}

impl From<JobRole> for String {
    fn from(role: JobRole) -> Self {
        role.title().to_string()
    }
}

impl std::fmt::Display for JobRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// System instruction for the live interviewer
pub fn interviewer_instruction(role: &JobRole) -> String {
    format!(
        "You are a professional tech interviewer conducting a behavioral and technical \
         screening for a {} position.\n\
         Ask one question at a time. Keep responses concise. Start by welcoming the candidate.\n\
         After 3-4 exchanges, politely conclude the interview and give a brief 1-sentence assessment.",
        role.title()
    )
}
