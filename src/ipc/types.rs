use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::IdentityProvider;
use crate::mail::MailSender;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub identity: Option<Box<dyn IdentityProvider>>,
    pub mailer: Option<Box<dyn MailSender>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            identity: None,
            mailer: None,
        }
    }
}
