//! Parses the three `AI_PLATFORM_*` environment variables §6 documents.
//! Nothing downstream currently branches on platform identity — no
//! processor in `oci-config` consults it — but a faithful settings surface
//! parses these anyway, matching `settings/source/Settings.cpp`'s own
//! unconditional read of them at startup; logged once so the running
//! platform is visible in the daemon's own log stream.

use std::fmt;

/// 4 hex digit platform identifier, e.g. the board revision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlatformIdent(pub u16);

impl PlatformIdent {
    fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u16::from_str_radix(raw, 16).ok().map(Self)
    }
}

impl fmt::Display for PlatformIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlatformType {
    Mr,
    Gw,
    Hip,
}

impl PlatformType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "MR" => Some(Self::Mr),
            "GW" => Some(Self::Gw),
            "HIP" => Some(Self::Hip),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlatformModel {
    Es140,
    Es130,
    Em150,
    Es240,
    Es340,
    EsI240,
    VStb,
    Es160,
}

impl PlatformModel {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ES140" => Some(Self::Es140),
            "ES130" => Some(Self::Es130),
            "EM150" => Some(Self::Em150),
            "ES240" => Some(Self::Es240),
            "ES340" => Some(Self::Es340),
            "ESi240" => Some(Self::EsI240),
            "vSTB" => Some(Self::VStb),
            "ES160" => Some(Self::Es160),
            _ => None,
        }
    }
}

/// §6 "Environment variables consumed". Any variable absent or
/// unparseable leaves its field `None` rather than failing the whole
/// daemon: platform identity is diagnostic, not load-bearing for the
/// lifecycle engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformInfo {
    pub ident: Option<PlatformIdent>,
    pub platform_type: Option<PlatformType>,
    pub model: Option<PlatformModel>,
}

impl PlatformInfo {
    pub fn from_env() -> Self {
        Self {
            ident: std::env::var("AI_PLATFORM_IDENT").ok().and_then(|v| PlatformIdent::parse(&v)),
            platform_type: std::env::var("AI_PLATFORM_TYPE").ok().and_then(|v| PlatformType::parse(&v)),
            model: std::env::var("AI_PLATFORM_MODEL").ok().and_then(|v| PlatformModel::parse(&v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_requires_exactly_four_hex_digits() {
        assert_eq!(PlatformIdent::parse("1a2b"), Some(PlatformIdent(0x1a2b)));
        assert_eq!(PlatformIdent::parse("1a2"), None);
        assert_eq!(PlatformIdent::parse("zzzz"), None);
    }

    #[test]
    fn type_and_model_reject_unknown_values() {
        assert_eq!(PlatformType::parse("MR"), Some(PlatformType::Mr));
        assert_eq!(PlatformType::parse("nope"), None);
        assert_eq!(PlatformModel::parse("vSTB"), Some(PlatformModel::VStb));
        assert_eq!(PlatformModel::parse("nope"), None);
    }
}
