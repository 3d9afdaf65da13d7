//! The users listing handler.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

/// Source of the users served by `GET /users`.
pub trait UserDirectory: Send + Sync {
    fn all_users(&self) -> Result<Vec<User>>;
}

/// A fixed list of users held in memory.
#[derive(Debug, Clone)]
pub struct StaticUserDirectory {
    users: Vec<User>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl Default for StaticUserDirectory {
    fn default() -> Self {
        let user = |id: u64, name: &str| User {
            id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        };
        Self::new(vec![user(1, "Ada"), user(2, "Grace"), user(3, "Linus")])
    }
}

impl UserDirectory for StaticUserDirectory {
    fn all_users(&self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersBody {
    pub users: Vec<User>,
}

pub(super) async fn list_users(State(state): State<AppState>) -> Result<Json<UsersBody>> {
    let users = state.users.all_users()?;
    Ok(Json(UsersBody { users }))
}
