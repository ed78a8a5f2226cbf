use core::fmt::Display;

use compact_str::CompactString;

mod guard_mode;
mod kind;
mod property;
mod string;
pub use guard_mode::*;
pub use kind::*;
pub use property::*;
pub use string::*;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Every topic this gateway publishes to or listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Gateway availability, also the last will
    Availability,
    State(ComponentId),
    Command(ComponentId),
    Config {
        kind: ComponentKind,
        id: ComponentId,
    },
    /// Birth/last will of the discovery consumer
    DiscoveryStatus,
}

impl Topic {
    pub const COMMAND_WILDCARD: Self = Self::Command(ComponentId::WILDCARD);

    pub fn with_roots<'a>(&'a self, roots: &'a TopicRoots) -> RootedTopic<'a> {
        RootedTopic { topic: self, roots }
    }
}

/// The two prefixes every topic hangs off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoots {
    /// Topics owned by this gateway, e.g. `eufysecurity`
    pub self_root: CompactString,
    /// Home Assistant discovery prefix, e.g. `homeassistant`
    pub discovery_root: CompactString,
}

impl TopicRoots {
    pub fn new(self_root: impl AsRef<str>, discovery_root: impl AsRef<str>) -> Self {
        Self {
            self_root: self_root.as_ref().into(),
            discovery_root: discovery_root.as_ref().into(),
        }
    }

    pub fn render(&self, topic: &Topic) -> String {
        topic.with_roots(self).to_string()
    }

    /// Classifies an incoming topic name
    pub fn parse(&self, s: &str) -> Result<Topic, &'static str> {
        if let Some(rest) = strip_root(s, &self.self_root) {
            let mut parts = rest.split('/');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some("status"), None, _) => Ok(Topic::Availability),
                (Some("state"), Some(id), None) if !id.is_empty() => {
                    Ok(Topic::State(ComponentId::from(id)))
                }
                (Some("command"), Some(id), None) if !id.is_empty() => {
                    Ok(Topic::Command(ComponentId::from(id)))
                }
                (Some("state" | "command"), _, _) => Err("{self}/{state|command}/{id}"),
                _ => Err("{self}/..."),
            };
        }

        if let Some(rest) = strip_root(s, &self.discovery_root) {
            let mut parts = rest.split('/');
            return match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("status"), None, _, _) => Ok(Topic::DiscoveryStatus),
                (Some(kind), Some(id), Some("config"), None) => Ok(Topic::Config {
                    kind: kind.parse()?,
                    id: ComponentId::from(id),
                }),
                _ => Err("{discovery}/..."),
            };
        }

        Err("not under a known root")
    }
}

fn strip_root<'a>(s: &'a str, root: &str) -> Option<&'a str> {
    s.strip_prefix(root)?.strip_prefix('/')
}

pub struct RootedTopic<'a> {
    topic: &'a Topic,
    roots: &'a TopicRoots,
}

impl Display for RootedTopic<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let TopicRoots { self_root, discovery_root } = self.roots;

        match self.topic {
            Topic::Availability => write!(f, "{self_root}/status"),
            Topic::State(id) => write!(f, "{self_root}/state/{id}"),
            Topic::Command(id) => write!(f, "{self_root}/command/{id}"),
            Topic::Config { kind, id } => write!(f, "{discovery_root}/{kind}/{id}/config"),
            Topic::DiscoveryStatus => write!(f, "{discovery_root}/status"),
        }
    }
}
