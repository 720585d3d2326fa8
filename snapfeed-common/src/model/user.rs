use crate::model::{Id, auth::PasswordDigest};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

pub const USERNAME_MAX_LEN: usize = 30;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// Display identity of a user, as embedded into posts and comments.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id<UserMarker>,
    pub username: Username,
    pub profile_picture: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewUser {
    pub username: Username,
    pub password: PasswordDigest,
    pub profile_picture: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UserCredentials {
    pub user: User,
    pub password: PasswordDigest,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Username must be 1 to {USERNAME_MAX_LEN} characters long: {0:?}")]
pub struct InvalidUsernameError(String);

impl Username {
    /// Surrounding whitespace is dropped before checking the length.
    pub fn new(username: String) -> Result<Self, InvalidUsernameError> {
        let trimmed = username.trim();
        let len = trimmed.chars().count();

        if (1..=USERNAME_MAX_LEN).contains(&len) {
            Ok(Username(trimmed.to_owned()))
        } else {
            Err(InvalidUsernameError(username))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Username::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"Username"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::user::{USERNAME_MAX_LEN, Username};

    #[test]
    fn username_bounds() {
        assert_eq!(Username::new("  alice ".into()).unwrap().get(), "alice");
        assert!(Username::new("a".repeat(USERNAME_MAX_LEN)).is_ok());
        assert!(Username::new("a".repeat(USERNAME_MAX_LEN + 1)).is_err());
        assert!(Username::new(String::new()).is_err());
        assert!(Username::new("   ".into()).is_err());
    }
}
