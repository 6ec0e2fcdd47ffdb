use crate::guest::Guest;
use crate::RuntimeError;
use lxsmb_schema::Username;
use std::fmt;
use tracing::warn;

/// A password held only long enough to hand it to `smbpasswd`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Accounts and groups inside the managed container.
pub trait IdentityDirectory {
    fn user_exists(&self, user: &Username) -> Result<bool, RuntimeError>;

    /// Create a login-less system account with `primary_group`. No home
    /// directory is created; homes are provisioned as storage units.
    fn create_user(&self, user: &Username, primary_group: &str) -> Result<(), RuntimeError>;

    /// Delete the account and its Samba password entry.
    fn delete_user(&self, user: &Username) -> Result<(), RuntimeError>;

    fn group_exists(&self, group: &str) -> Result<bool, RuntimeError>;

    fn create_group(&self, group: &str) -> Result<(), RuntimeError>;

    fn delete_group(&self, group: &str) -> Result<(), RuntimeError>;

    fn groups_of(&self, user: &Username) -> Result<Vec<String>, RuntimeError>;

    fn add_to_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError>;

    fn remove_from_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError>;

    /// Set (or create) the Samba password of an existing account.
    fn set_password(&self, user: &Username, secret: &Secret) -> Result<(), RuntimeError>;
}

/// Shadow and Samba tools run inside the guest.
pub struct GuestIdentity<'a> {
    guest: &'a dyn Guest,
}

impl<'a> GuestIdentity<'a> {
    pub fn new(guest: &'a dyn Guest) -> Self {
        Self { guest }
    }

    fn getent(&self, database: &str, key: &str) -> Result<bool, RuntimeError> {
        let out = self.guest.exec(&["getent", database, key], None)?;
        match out.code {
            0 => Ok(true),
            2 => Ok(false),
            _ => out.check("getent").map(|_| false),
        }
    }
}

impl IdentityDirectory for GuestIdentity<'_> {
    fn user_exists(&self, user: &Username) -> Result<bool, RuntimeError> {
        self.getent("passwd", user.as_str())
    }

    fn create_user(&self, user: &Username, primary_group: &str) -> Result<(), RuntimeError> {
        self.guest.run(&[
            "useradd",
            "--no-create-home",
            "--gid",
            primary_group,
            "--shell",
            "/usr/sbin/nologin",
            user.as_str(),
        ])?;
        Ok(())
    }

    fn delete_user(&self, user: &Username) -> Result<(), RuntimeError> {
        let out = self.guest.exec(&["smbpasswd", "-x", user.as_str()], None)?;
        if !out.success() {
            warn!("no samba password entry removed for {user}");
        }
        self.guest.run(&["userdel", user.as_str()])?;
        Ok(())
    }

    fn group_exists(&self, group: &str) -> Result<bool, RuntimeError> {
        self.getent("group", group)
    }

    fn create_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.guest.run(&["groupadd", "--system", group])?;
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.guest.run(&["groupdel", group])?;
        Ok(())
    }

    fn groups_of(&self, user: &Username) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .guest
            .run(&["id", "-nG", user.as_str()])?
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect())
    }

    fn add_to_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError> {
        self.guest.run(&["usermod", "--append", "--groups", group, user.as_str()])?;
        Ok(())
    }

    fn remove_from_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError> {
        self.guest.run(&["gpasswd", "--delete", user.as_str(), group])?;
        Ok(())
    }

    fn set_password(&self, user: &Username, secret: &Secret) -> Result<(), RuntimeError> {
        let input = format!("{0}\n{0}\n", secret.expose());
        self.guest
            .exec(&["smbpasswd", "-s", "-a", user.as_str()], Some(&input))?
            .check("smbpasswd")?;
        Ok(())
    }
}
