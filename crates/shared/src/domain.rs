use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TenantId);
id_newtype!(UserId);
id_newtype!(ClientId);
id_newtype!(CaseId);
id_newtype!(MessageId);
id_newtype!(InviteId);

/// Office-level role carried in every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Lawyer,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Lawyer => "Lawyer",
            Role::Client => "Client",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Admin" => Some(Role::Admin),
            "Lawyer" => Some(Role::Lawyer),
            "Client" => Some(Role::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Closed,
    Pending,
    #[serde(rename = "On Hold")]
    OnHold,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 5] = [
        CaseStatus::Open,
        CaseStatus::InProgress,
        CaseStatus::Closed,
        CaseStatus::Pending,
        CaseStatus::OnHold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Open => "Open",
            CaseStatus::InProgress => "In Progress",
            CaseStatus::Closed => "Closed",
            CaseStatus::Pending => "Pending",
            CaseStatus::OnHold => "On Hold",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

/// Sub-role of a user participating in a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseUserRole {
    LeadLawyer,
    SupportLawyer,
}

impl CaseUserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseUserRole::LeadLawyer => "LeadLawyer",
            CaseUserRole::SupportLawyer => "SupportLawyer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LeadLawyer" => Some(CaseUserRole::LeadLawyer),
            "SupportLawyer" => Some(CaseUserRole::SupportLawyer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseClientRole {
    MainContact,
    OtherContact,
}

impl CaseClientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseClientRole::MainContact => "MainContact",
            CaseClientRole::OtherContact => "OtherContact",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "MainContact" => Some(CaseClientRole::MainContact),
            "OtherContact" => Some(CaseClientRole::OtherContact),
            _ => None,
        }
    }
}

/// Who authored a message. Exactly one side is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SenderRef {
    User(UserId),
    Client(ClientId),
}

impl SenderRef {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            SenderRef::User(id) => Some(id),
            SenderRef::Client(_) => None,
        }
    }

    pub fn client_id(self) -> Option<ClientId> {
        match self {
            SenderRef::User(_) => None,
            SenderRef::Client(id) => Some(id),
        }
    }
}
