//! Errors raised by class registration and dispatch

use thiserror::Error;

/// Errors that can occur while registering classes or dispatching on objects
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("class '{0}' is already registered")]
    DuplicateClass(String),

    #[error("class '{class}' registered before its parent '{parent}'")]
    ParentNotRegistered { class: String, parent: String },

    #[error("global '{0}' is already defined")]
    GlobalTaken(String),

    #[error("{expected} expected, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("invalid object of class '{0}'")]
    InvalidObject(String),

    #[error("property '{property}' of class '{class}' is read-only")]
    ImmutableProperty { class: String, property: String },

    #[error("class '{class}' has no property '{property}'")]
    UnknownProperty { class: String, property: String },

    #[error("object of class '{class}' carries no {data} data")]
    MissingData { class: String, data: &'static str },

    #[error("{data} data of class '{class}' is already borrowed")]
    DataBorrowed { class: String, data: &'static str },

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

impl ClassError {
    /// Registration errors are fatal at startup
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            ClassError::DuplicateClass(_)
                | ClassError::ParentNotRegistered { .. }
                | ClassError::GlobalTaken(_)
        )
    }
}

impl From<ClassError> for mlua::Error {
    fn from(err: ClassError) -> Self {
        match err {
            ClassError::Lua(e) => e,
            other => mlua::Error::external(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_kind() {
        assert!(ClassError::DuplicateClass("client".into()).is_registration());
        assert!(ClassError::ParentNotRegistered {
            class: "client".into(),
            parent: "window".into(),
        }
        .is_registration());
        assert!(ClassError::GlobalTaken("string".into()).is_registration());
        assert!(!ClassError::InvalidObject("client".into()).is_registration());
    }

    #[test]
    fn test_messages() {
        let err = ClassError::TypeMismatch {
            expected: "client".into(),
            got: "number".into(),
        };
        assert_eq!(err.to_string(), "client expected, got number");

        let err = ClassError::ParentNotRegistered {
            class: "client".into(),
            parent: "window".into(),
        };
        assert_eq!(
            err.to_string(),
            "class 'client' registered before its parent 'window'"
        );
    }

    #[test]
    fn test_lua_error_passthrough() {
        let lua_err = mlua::Error::RuntimeError("boom".into());
        let err: mlua::Error = ClassError::Lua(lua_err).into();
        assert!(matches!(err, mlua::Error::RuntimeError(ref m) if m == "boom"));
    }
}
