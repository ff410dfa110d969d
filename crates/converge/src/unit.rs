//! Units of work: one resource of one category inside a config.

use metadata::{
    Command, Config, File, Group, InitSystem, PackageManager, Service, User, VersionSpec,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource categories, declared in apply order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Groups,
    Users,
    Packages,
    Sources,
    Files,
    Commands,
    Services,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groups => "groups",
            Self::Users => "users",
            Self::Packages => "packages",
            Self::Sources => "sources",
            Self::Files => "files",
            Self::Commands => "commands",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(category, resource name)` pair
///
/// Packages are named `manager:name` and services `init-system:name`, so a
/// name is unique within its category across a whole config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    pub category: Category,
    pub name: String,
}

impl Unit {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    pub fn package(manager: PackageManager, name: &str) -> Self {
        Self::new(Category::Packages, format!("{manager}:{name}"))
    }

    pub fn service(system: InitSystem, name: &str) -> Self {
        Self::new(Category::Services, format!("{system}:{name}"))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.category, self.name)
    }
}

/// One resource of a config, borrowed from the decoded metadata
#[derive(Debug, Clone, Copy)]
pub enum Action<'c> {
    Group {
        name: &'c str,
        spec: &'c Group,
    },
    User {
        name: &'c str,
        spec: &'c User,
    },
    Package {
        manager: PackageManager,
        name: &'c str,
        versions: &'c VersionSpec,
    },
    Source {
        dir: &'c str,
        uri: &'c str,
    },
    File {
        path: &'c str,
        spec: &'c File,
    },
    Command {
        name: &'c str,
        spec: &'c Command,
    },
    Service {
        system: InitSystem,
        name: &'c str,
        spec: &'c Service,
    },
}

impl Action<'_> {
    pub fn unit(&self) -> Unit {
        match *self {
            Action::Group { name, .. } => Unit::new(Category::Groups, name),
            Action::User { name, .. } => Unit::new(Category::Users, name),
            Action::Package { manager, name, .. } => Unit::package(manager, name),
            Action::Source { dir, .. } => Unit::new(Category::Sources, dir),
            Action::File { path, .. } => Unit::new(Category::Files, path),
            Action::Command { name, .. } => Unit::new(Category::Commands, name),
            Action::Service { system, name, .. } => Unit::service(system, name),
        }
    }
}

/// Every resource of `config`, in apply order.
///
/// Categories follow [`Category`] order; entries within a category keep
/// their declaration order.
pub fn actions(config: &Config) -> Vec<Action<'_>> {
    let groups = config
        .groups
        .iter()
        .map(|(name, spec)| Action::Group { name, spec });
    let users = config
        .users
        .iter()
        .map(|(name, spec)| Action::User { name, spec });
    let packages = config.packages.iter().flat_map(|(manager, packages)| {
        packages.iter().map(|(name, versions)| Action::Package {
            manager: *manager,
            name,
            versions,
        })
    });
    let sources = config
        .sources
        .iter()
        .map(|(dir, uri)| Action::Source { dir, uri });
    let files = config
        .files
        .iter()
        .map(|(path, spec)| Action::File { path, spec });
    let commands = config
        .commands
        .iter()
        .map(|(name, spec)| Action::Command { name, spec });
    let services = config.services.iter().flat_map(|(system, services)| {
        services.iter().map(|(name, spec)| Action::Service {
            system: *system,
            name,
            spec,
        })
    });

    groups
        .chain(users)
        .chain(packages)
        .chain(sources)
        .chain(files)
        .chain(commands)
        .chain(services)
        .collect()
}
