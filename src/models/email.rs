use serde::{Deserialize, Serialize};

/// Body accepted by the transactional mail API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailResponse {
    pub id: Option<String>,
    pub error: Option<String>,
}
