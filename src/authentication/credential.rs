//! Credential variants and their type descriptors.
//!
//! Rust has no class hierarchy to query at runtime, so every credential
//! carries a static [`CredentialType`] descriptor. A descriptor lists its
//! parents (abstract bases and capabilities); assignability is a walk over
//! that DAG. This is what lets an [`AuthenticationTransaction`] answer
//! "does it hold any password credential?" without caring which concrete
//! password credential was submitted.
//!
//! [`AuthenticationTransaction`]: crate::authentication::AuthenticationTransaction
use std::fmt;

/// Static descriptor for a credential type.
///
/// Descriptors are compared by name; names must be unique.
pub struct CredentialType {
    name: &'static str,
    parents: &'static [&'static CredentialType],
}

impl CredentialType {
    /// Builds a descriptor; `parents` is usually a named `static` array.
    pub const fn new(name: &'static str, parents: &'static [&'static CredentialType]) -> Self {
        Self { name, parents }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parents(&self) -> &'static [&'static CredentialType] {
        self.parents
    }

    /// True when a credential of this type can be used where `other` is
    /// expected: `other` is this type or one of its transitive parents.
    pub fn is_assignable_to(&self, other: &CredentialType) -> bool {
        if self == other {
            return true;
        }
        self.parents.iter().any(|p| p.is_assignable_to(other))
    }
}

impl PartialEq for CredentialType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CredentialType {}

impl fmt::Debug for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Root of every credential type.
pub static CREDENTIAL: CredentialType = CredentialType {
    name: "Credential",
    parents: &[],
};

/// Capability: the user asked to be remembered across browser sessions.
pub static REMEMBER_ME: CredentialType = CredentialType {
    name: "RememberMe",
    parents: &[&CREDENTIAL],
};

/// Abstract base of password-like credentials.
pub static ABSTRACT_PASSWORD: CredentialType = CredentialType {
    name: "AbstractPassword",
    parents: &[&CREDENTIAL],
};

pub static USERNAME_PASSWORD: CredentialType = CredentialType {
    name: "UsernamePassword",
    parents: &[&ABSTRACT_PASSWORD],
};

pub static REMEMBER_ME_USERNAME_PASSWORD: CredentialType = CredentialType {
    name: "RememberMeUsernamePassword",
    parents: &[&USERNAME_PASSWORD, &REMEMBER_ME],
};

pub static X509_CERTIFICATE: CredentialType = CredentialType {
    name: "X509Certificate",
    parents: &[&CREDENTIAL],
};

/// Abstract base of bearer/token credentials.
pub static ABSTRACT_TOKEN: CredentialType = CredentialType {
    name: "AbstractToken",
    parents: &[&CREDENTIAL],
};

pub static ONE_TIME_TOKEN: CredentialType = CredentialType {
    name: "OneTimeToken",
    parents: &[&ABSTRACT_TOKEN],
};

/// Callback URL presented by a service asking for a proxy-granting ticket.
pub static HTTP_BASED_SERVICE: CredentialType = CredentialType {
    name: "HttpBasedService",
    parents: &[&CREDENTIAL],
};

/// A credential supplied by a client for one authentication attempt.
pub trait Credential: fmt::Debug + Send + Sync {
    /// Identifier the credential asserts (username, certificate subject, ...).
    fn id(&self) -> Option<&str>;

    fn credential_type(&self) -> &'static CredentialType;

    /// Secret the credential proves possession with, if it carries one.
    fn secret(&self) -> Option<&str> {
        None
    }

    fn is_of_type(&self, expected: &CredentialType) -> bool {
        self.credential_type().is_assignable_to(expected)
    }
}

#[derive(Clone)]
pub struct UsernamePasswordCredential {
    pub username: String,
    password: String,
    pub remember_me: bool,
}

impl UsernamePasswordCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    pub fn remembered(mut self) -> Self {
        self.remember_me = true;
        self
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for UsernamePasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the password
        f.debug_struct("UsernamePasswordCredential")
            .field("username", &self.username)
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

impl Credential for UsernamePasswordCredential {
    fn id(&self) -> Option<&str> {
        Some(&self.username)
    }

    fn credential_type(&self) -> &'static CredentialType {
        if self.remember_me {
            &REMEMBER_ME_USERNAME_PASSWORD
        } else {
            &USERNAME_PASSWORD
        }
    }

    fn secret(&self) -> Option<&str> {
        Some(&self.password)
    }
}

#[derive(Debug, Clone)]
pub struct X509CertificateCredential {
    pub subject_dn: String,
    pub serial_number: String,
}

impl Credential for X509CertificateCredential {
    fn id(&self) -> Option<&str> {
        Some(&self.subject_dn)
    }

    fn credential_type(&self) -> &'static CredentialType {
        &X509_CERTIFICATE
    }
}

#[derive(Clone)]
pub struct OneTimeTokenCredential {
    token: String,
}

impl OneTimeTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for OneTimeTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneTimeTokenCredential").finish_non_exhaustive()
    }
}

impl Credential for OneTimeTokenCredential {
    fn id(&self) -> Option<&str> {
        None
    }

    fn credential_type(&self) -> &'static CredentialType {
        &ONE_TIME_TOKEN
    }

    fn secret(&self) -> Option<&str> {
        Some(&self.token)
    }
}

/// Proxy callback credential: the URL a service wants its PGT delivered to.
#[derive(Debug, Clone)]
pub struct HttpBasedServiceCredential {
    pub callback_url: String,
    pub service_id: String,
}

impl Credential for HttpBasedServiceCredential {
    fn id(&self) -> Option<&str> {
        Some(&self.callback_url)
    }

    fn credential_type(&self) -> &'static CredentialType {
        &HTTP_BASED_SERVICE
    }
}
