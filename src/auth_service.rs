use std::fmt;
use std::sync::RwLock;

use log::*;
use serde::{Deserialize, Serialize};

use crate::model::{Error, Method};

/// Maximum number of users in a [`UserStore`]
pub const MAX_USERS: usize = 10;

pub trait AuthService: Send + Sync {
    /// methods the server is willing to negotiate
    ///
    /// # Details
    /// The method chosen among these is the first in `Method::PREFERENCE`
    /// which the client also offered.
    fn acceptable_methods(&self) -> Vec<Method>;

    /// check username/password credentials
    fn authenticate(&self, username: &str, password: &str) -> Result<bool, Error>;
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password: String,
}

impl User {
    pub fn new<S: Into<String>, P: Into<String>>(name: S, password: P) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("password", &"***")
            .finish()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("user already exists: {name}")]
    AlreadyExists { name: String },
    #[error("too many users: at most {max}")]
    TooManyUsers { max: usize },
    #[error("no such user: {name}")]
    NotFound { name: String },
    #[error("user store lock poisoned")]
    Poisoned,
}

/// Users allowed to authenticate with username/password.
///
/// Authentication is required iff at least one user exists.
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<Vec<User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I: IntoIterator<Item = User>>(users: I) -> Result<Self, UserError> {
        let store = Self::new();
        for user in users {
            store.add_user(user)?;
        }
        Ok(store)
    }

    pub fn add_user(&self, user: User) -> Result<(), UserError> {
        let mut users = self.users.write().map_err(|_| UserError::Poisoned)?;
        if users.iter().any(|u| u.name == user.name) {
            return Err(UserError::AlreadyExists { name: user.name });
        }
        if users.len() >= MAX_USERS {
            return Err(UserError::TooManyUsers { max: MAX_USERS });
        }
        info!("user added: {}", user.name);
        users.push(user);
        Ok(())
    }

    pub fn remove_user(&self, name: &str) -> Result<(), UserError> {
        let mut users = self.users.write().map_err(|_| UserError::Poisoned)?;
        let pos = users
            .iter()
            .position(|u| u.name == name)
            .ok_or_else(|| UserError::NotFound { name: name.into() })?;
        users.remove(pos);
        info!("user removed: {}", name);
        Ok(())
    }

    pub fn change_password(&self, name: &str, password: &str) -> Result<(), UserError> {
        let mut users = self.users.write().map_err(|_| UserError::Poisoned)?;
        let user = users
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| UserError::NotFound { name: name.into() })?;
        user.password = password.into();
        info!("password changed: {}", name);
        Ok(())
    }

    /// user names
    pub fn users(&self) -> Vec<String> {
        match self.users.read() {
            Ok(users) => users.iter().map(|u| u.name.clone()).collect(),
            Err(_) => vec![],
        }
    }

    pub fn needs_auth(&self) -> bool {
        !self.users().is_empty()
    }
}

impl AuthService for UserStore {
    fn acceptable_methods(&self) -> Vec<Method> {
        if self.needs_auth() {
            vec![Method::UserPass, Method::GssApi]
        } else {
            vec![Method::NoAuth, Method::GssApi]
        }
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<bool, Error> {
        let users = self.users.read()?;
        Ok(users
            .iter()
            .any(|u| u.name == username && u.password == password))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_remove_users() {
        let store = UserStore::new();
        assert!(!store.needs_auth());
        assert_eq!(
            store.acceptable_methods(),
            vec![Method::NoAuth, Method::GssApi]
        );

        store.add_user(User::new("alice", "pw")).unwrap();
        assert!(store.needs_auth());
        assert_eq!(
            store.acceptable_methods(),
            vec![Method::UserPass, Method::GssApi]
        );
        assert_eq!(
            store.add_user(User::new("alice", "other")),
            Err(UserError::AlreadyExists {
                name: "alice".into()
            })
        );

        store.remove_user("alice").unwrap();
        assert!(!store.needs_auth());
        assert_eq!(
            store.remove_user("alice"),
            Err(UserError::NotFound {
                name: "alice".into()
            })
        );
    }

    #[test]
    fn user_limit() {
        let store =
            UserStore::with_users((0..MAX_USERS).map(|i| User::new(format!("u{}", i), "pw")))
                .unwrap();
        assert_eq!(store.users().len(), MAX_USERS);
        assert_eq!(
            store.add_user(User::new("one-more", "pw")),
            Err(UserError::TooManyUsers { max: MAX_USERS })
        );
    }

    #[test]
    fn authenticate() {
        let store = UserStore::with_users(vec![User::new("bob", "hunter2")]).unwrap();
        assert!(store.authenticate("bob", "hunter2").unwrap());
        assert!(!store.authenticate("bob", "hunter3").unwrap());
        assert!(!store.authenticate("eve", "hunter2").unwrap());

        store.change_password("bob", "hunter3").unwrap();
        assert!(store.authenticate("bob", "hunter3").unwrap());
        assert!(store.change_password("eve", "x").is_err());
    }
}
