use webrtc::ice::mdns::MulticastDnsMode;

/// Environment override for the mDNS mode
pub const MDNS_MODE_ENV: &str = "DROIDLINK_WEBRTC_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }

    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode_from_env() -> Option<MulticastDnsMode> {
    let raw = std::env::var(MDNS_MODE_ENV).ok()?;
    parse_mdns_mode(&raw)
}

/// Effective mode: environment, then config, then `QueryOnly`
///
/// `QueryOnly` keeps `.local` host candidates out of the answer while still
/// resolving the browser's obfuscated candidates.
pub fn mdns_mode(configured: Option<&str>) -> MulticastDnsMode {
    mdns_mode_from_env()
        .or_else(|| configured.and_then(parse_mdns_mode))
        .unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn default_mdns_host_name(session_id: &str) -> String {
    format!("{session_id}.local")
}
