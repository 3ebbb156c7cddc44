//! Node configuration: data directory, bind address, friend list, and node
//! name, loadable from a flag-driven `clap::Parser` struct or a `confy`
//! overlay file for settings not passed on the command line.

use std::path::PathBuf;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_DATA_DIR: &str = "data/mvkv";

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(version, author, about = "mvkv: a versioned, replicated key-value store")]
pub struct Args {
    /// Directory holding `mvkv.db`, `mvkv.log`, and `replication`.
    #[clap(short = 'd', long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Address the HTTP server binds to.
    #[clap(short = 'b', long = "bind", default_value = "0.0.0.0:7380")]
    pub bind: String,

    /// Semicolon-separated friend list: `scheme://name@host[:port]`.
    #[clap(short = 'f', long = "friends", default_value = "")]
    pub friends: String,

    /// Human-readable node name used only in logs (node identity itself
    /// is the random id stored in the sentinel key).
    #[clap(short = 'n', long = "node-name", default_value = "mvkv")]
    pub node_name: String,

    #[clap(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,

    #[clap(long, help = "Load additional settings from this config file", default_value = "")]
    pub config: String,
}

/// One parsed friend list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    pub scheme: String,
    pub name: String,
    pub addr: String,
}

/// Optional file overlay for fields a flag left at its default. Loaded
/// via `confy` when `--config` names a file; any field present there
/// fills in gaps rather than overriding an explicitly-passed flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOverlay {
    pub data_dir: Option<PathBuf>,
    pub bind: Option<String>,
    pub friends: Option<String>,
    pub node_name: Option<String>,
    pub log_level: Option<String>,
}

impl Args {
    /// Loads `--config` (if set) and fills in any field still at its
    /// built-in default.
    pub fn apply_file_overlay(&mut self) -> anyhow::Result<()> {
        if self.config.is_empty() {
            return Ok(());
        }
        let overlay: FileOverlay = confy::load_path(&self.config)?;
        if self.data_dir == PathBuf::from(DEFAULT_DATA_DIR) {
            if let Some(v) = overlay.data_dir {
                self.data_dir = v;
            }
        }
        if self.bind == "0.0.0.0:7380" {
            if let Some(v) = overlay.bind {
                self.bind = v;
            }
        }
        if self.friends.is_empty() {
            if let Some(v) = overlay.friends {
                self.friends = v;
            }
        }
        if self.node_name == "mvkv" {
            if let Some(v) = overlay.node_name {
                self.node_name = v;
            }
        }
        if self.log_level == "info" {
            if let Some(v) = overlay.log_level {
                self.log_level = v;
            }
        }
        Ok(())
    }

    /// Parses the `--friends` flag into individual peer descriptors.
    /// Format per entry: `scheme://name@host[:port]`. Blank entries
    /// (and a wholly empty flag) are ignored.
    pub fn friends(&self) -> Vec<Friend> {
        self.friends
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(parse_friend)
            .collect()
    }
}

fn parse_friend(raw: &str) -> Option<Friend> {
    let (scheme, rest) = raw.split_once("://")?;
    let (name, addr) = rest.split_once('@')?;
    if name.is_empty() || addr.is_empty() {
        return None;
    }
    Some(Friend { scheme: scheme.to_string(), name: name.to_string(), addr: addr.to_string() })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_multiple_friends() {
        let args = Args {
            data_dir: PathBuf::from("d"),
            bind: "x".into(),
            friends: "http://a@host1:7380;http://b@host2:7380".into(),
            node_name: "n".into(),
            log_level: "info".into(),
            config: "".into(),
        };
        let friends = args.friends();
        assert_eq!(friends.len(), 2);
        assert_eq!(friends[0], Friend { scheme: "http".into(), name: "a".into(), addr: "host1:7380".into() });
        assert_eq!(friends[1].name, "b");
    }

    #[test]
    fn blank_friend_list_is_empty() {
        let args = Args {
            data_dir: PathBuf::from("d"),
            bind: "x".into(),
            friends: "".into(),
            node_name: "n".into(),
            log_level: "info".into(),
            config: "".into(),
        };
        assert!(args.friends().is_empty());
    }

    #[test]
    fn malformed_entry_is_skipped() {
        let args = Args {
            data_dir: PathBuf::from("d"),
            bind: "x".into(),
            friends: "not-a-friend;http://a@host".into(),
            node_name: "n".into(),
            log_level: "info".into(),
            config: "".into(),
        };
        assert_eq!(args.friends().len(), 1);
    }
}
