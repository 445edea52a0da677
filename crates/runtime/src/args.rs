//! Subcommand and argument enums for the `runc`/`crun` command line,
//! trimmed to the subset §4.4 actually drives (no checkpoint/restore/ps/
//! update/spec support — this core never calls those).

use std::fmt;
use std::path::PathBuf;

use strum::AsRefStr;

fn write_kv<K, V>(f: &mut fmt::Formatter<'_>, key: K, value: V) -> fmt::Result
where
    K: AsRef<str>,
    V: fmt::Display,
{
    write!(f, "{}={}", key.as_ref(), value)
}

#[derive(AsRefStr, Clone, Debug, Hash, Eq, PartialEq)]
#[strum(serialize_all = "kebab_case")]
pub enum CreateArgs {
    Bundle(PathBuf),
    ConsoleSocket(PathBuf),
    PidFile(PathBuf),
    PreserveFds(usize),
}

impl fmt::Display for CreateArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CreateArgs::*;
        write!(f, "--")?;
        match self {
            Bundle(path) => write_kv(f, self, path.display()),
            ConsoleSocket(path) => write_kv(f, self, path.display()),
            PidFile(path) => write_kv(f, self, path.display()),
            PreserveFds(n) => write_kv(f, self, n),
        }
    }
}

#[derive(AsRefStr, Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSignal {
    Term,
    Kill,
    Usr1,
    Usr2,
    Hup,
}

#[derive(AsRefStr, Clone, Debug, Hash, Eq, PartialEq)]
#[strum(serialize_all = "kebab_case")]
pub enum ExecArgs {
    ConsoleSocket(PathBuf),
    Detach,
    Tty,
    PidFile(PathBuf),
}

impl fmt::Display for ExecArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExecArgs::*;
        write!(f, "--")?;
        match self {
            ConsoleSocket(path) => write_kv(f, self, path.display()),
            PidFile(path) => write_kv(f, self, path.display()),
            _ => write!(f, "{}", self.as_ref()),
        }
    }
}

#[derive(AsRefStr, Clone, Debug, Hash, Eq, PartialEq)]
#[strum(serialize_all = "kebab_case")]
pub enum ListArgs {
    Format(String),
}

impl fmt::Display for ListArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ListArgs::*;
        write!(f, "--")?;
        match self {
            Format(val) => write_kv(f, self, val),
        }
    }
}
