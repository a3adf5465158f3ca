//! Request and response payloads exchanged with the planning service

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stream::TripPlan;

/// Trip request submitted by the user. Sent as-is to both plan endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripFormData {
    pub city: String,
    pub start_date: String,
    pub end_date: String,
    pub travel_days: u32,
    pub transportation: String,
    pub accommodation: String,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_text_input: Option<String>,
}

/// Envelope returned by the plan endpoints, and synthesized by the
/// streaming session once a plan arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripPlanResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<TripPlan>,
    #[serde(default)]
    pub requires_login: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Cached profile of the logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Envelope returned by the register and current-user endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<UserInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    /// Username or email; the service accepts either.
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct SavePlanRequest<'a> {
    pub request: &'a TripFormData,
    pub plan: &'a TripPlan,
}
