//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::store::{Collection, Document};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    id: Uuid,
    email: String,
    name: String,
    password_hash: String,
    role: Role,
    active: bool,
    stripe_customer_id: Option<String>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role { #[default] Customer, Staff, Admin }

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Customer => "customer", Self::Staff => "staff", Self::Admin => "admin" }
    }
    pub fn is_staff(&self) -> bool { matches!(self, Self::Staff | Self::Admin) }
}

/// What the API exposes about a user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: Collection = Collection::Users;
    fn id(&self) -> Uuid { self.id }
}

impl User {
    pub fn new(email: &str, name: impl Into<String>, password_hash: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), email: normalize_email(email), name: name.into(), password_hash, role,
            active: true, stripe_customer_id: None, last_login_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn email(&self) -> &str { &self.email }
    pub fn name(&self) -> &str { &self.name }
    pub fn password_hash(&self) -> &str { &self.password_hash }
    pub fn role(&self) -> Role { self.role }
    pub fn is_active(&self) -> bool { self.active }
    pub fn stripe_customer_id(&self) -> Option<&str> { self.stripe_customer_id.as_deref() }

    pub fn profile(&self) -> UserProfile {
        UserProfile { id: self.id, email: self.email.clone(), name: self.name.clone(), role: self.role, active: self.active, created_at: self.created_at }
    }

    pub fn record_login(&mut self) { self.last_login_at = Some(Utc::now()); self.touch(); }
    pub fn set_role(&mut self, role: Role) { self.role = role; self.touch(); }
    pub fn set_active(&mut self, active: bool) { self.active = active; self.touch(); }
    pub fn set_stripe_customer(&mut self, customer_id: impl Into<String>) { self.stripe_customer_id = Some(customer_id.into()); self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }
