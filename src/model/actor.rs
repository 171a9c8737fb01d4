use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

identifier!(UserId);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Professor => "professor",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "professor" => Ok(Role::Professor),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role {other}")),
        }
    }
}

/// An already authenticated caller, as handed over by the transport layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i64, role: Role) -> Actor {
        Actor {
            id: UserId(id),
            role,
        }
    }

    /// Fail with [`Error::Forbidden`] unless the actor has one of the roles.
    pub fn require_role(&self, roles: &[Role]) -> Result<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role {} cannot perform this operation",
                self.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}

#[test]
fn test_require_role() {
    let professor = Actor::new(3, Role::Professor);
    assert!(professor.require_role(&[Role::Professor, Role::Admin]).is_ok());
    assert!(matches!(
        professor.require_role(&[Role::Admin]),
        Err(Error::Forbidden(_))
    ));
    assert_eq!("student".parse::<Role>(), Ok(Role::Student));
    assert!("dean".parse::<Role>().is_err());
}
