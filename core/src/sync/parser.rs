//! Subscription document decoding and parsing.
//!
//! A document is either a structured YAML config carrying a `proxies:` list
//! (Clash-style) or a plain list of proxy descriptor URIs, optionally
//! base64-encoded as a whole. Structured entries are converted leniently and
//! rejected later at validation so malformed entries still count as fetched;
//! unparseable URI lines are dropped outright.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::identity::RawNodeConfig;

/// Base64-decode the whole body when it decodes to valid UTF-8, otherwise
/// pass the raw body through.
pub fn decode_body(body: &str) -> String {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(compact.as_bytes()));
    match decoded {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ProxyDocument {
    #[serde(default)]
    proxies: Vec<serde_yaml::Value>,
}

/// Parse a decoded document into raw node configurations. Structured-list
/// parsing wins when it yields any entries; otherwise every non-empty line
/// is tried as a proxy descriptor URI.
pub fn parse_document(content: &str) -> Vec<RawNodeConfig> {
    if let Ok(doc) = serde_yaml::from_str::<ProxyDocument>(content) {
        if !doc.proxies.is_empty() {
            debug!("Parsed structured document with {} proxies", doc.proxies.len());
            return doc.proxies.iter().map(proxy_map_to_config).collect();
        }
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_proxy_uri)
        .collect()
}

/// Lenient conversion of one structured proxy entry. Missing fields become
/// empty/zero so the entry is counted as fetched and rejected at validation.
fn proxy_map_to_config(value: &serde_yaml::Value) -> RawNodeConfig {
    let config = serde_json::to_value(value).unwrap_or(Value::Null);

    let name = config
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let server = config
        .get("server")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let port = port_from_value(config.get("port"));
    let protocol = config
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    RawNodeConfig {
        name,
        server,
        port,
        protocol,
        config,
    }
}

fn port_from_value(value: Option<&Value>) -> u16 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse one proxy descriptor URI. Unsupported schemes and structurally
/// broken URIs yield `None` and are skipped by the caller.
pub fn parse_proxy_uri(line: &str) -> Option<RawNodeConfig> {
    if let Some(rest) = line.strip_prefix("vmess://") {
        return parse_vmess(rest);
    }
    if let Some(rest) = line.strip_prefix("ss://") {
        return parse_shadowsocks(rest);
    }
    if line.starts_with("trojan://") {
        return parse_url_style(line, "trojan");
    }
    if line.starts_with("vless://") {
        return parse_url_style(line, "vless");
    }
    None
}

/// vmess links carry a base64-encoded JSON object (`add`, `port`, `ps`, ...).
fn parse_vmess(encoded: &str) -> Option<RawNodeConfig> {
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(encoded.as_bytes()))
        .ok()?;
    let config: Value = serde_json::from_slice(&bytes).ok()?;

    let server = config.get("add").and_then(Value::as_str)?.to_string();
    let port = port_from_value(config.get("port"));
    let name = config
        .get("ps")
        .and_then(Value::as_str)
        .unwrap_or(&server)
        .to_string();

    Some(RawNodeConfig {
        name,
        server,
        port,
        protocol: "vmess".to_string(),
        config,
    })
}

/// Two common shadowsocks layouts:
/// `ss://base64(method:password@host:port)#name` and
/// `ss://base64(method:password)@host:port#name`.
fn parse_shadowsocks(rest: &str) -> Option<RawNodeConfig> {
    let (body, fragment) = match rest.split_once('#') {
        Some((body, fragment)) => (body.to_string(), Some(fragment)),
        None => (rest.to_string(), None),
    };

    let body = if body.contains('@') {
        body
    } else {
        let bytes = STANDARD
            .decode(body.as_bytes())
            .or_else(|_| STANDARD_NO_PAD.decode(body.as_bytes()))
            .ok()?;
        String::from_utf8(bytes).ok()?
    };

    let (userinfo, hostport) = body.rsplit_once('@')?;
    let (server, port_str) = hostport.rsplit_once(':')?;
    let port: u16 = port_str.parse().unwrap_or(0);

    // Userinfo may itself be base64(method:password)
    let userinfo = match STANDARD.decode(userinfo.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| userinfo.to_string()),
        Err(_) => userinfo.to_string(),
    };
    let (cipher, password) = userinfo.split_once(':').unwrap_or((userinfo.as_str(), ""));

    let name = fragment
        .map(|f| urlencoding::decode(f).map(|s| s.into_owned()).unwrap_or_else(|_| f.to_string()))
        .unwrap_or_else(|| server.to_string());

    Some(RawNodeConfig {
        name: name.clone(),
        server: server.to_string(),
        port,
        protocol: "ss".to_string(),
        config: json!({
            "name": name,
            "type": "ss",
            "server": server,
            "port": port,
            "cipher": cipher,
            "password": password,
        }),
    })
}

/// trojan/vless links are plain URLs: `scheme://secret@host:port?...#name`.
fn parse_url_style(line: &str, protocol: &str) -> Option<RawNodeConfig> {
    let parsed = url::Url::parse(line).ok()?;
    let server = parsed.host_str()?.to_string();
    let port = parsed.port().unwrap_or(0);
    let secret = parsed.username().to_string();

    let name = parsed
        .fragment()
        .map(|f| urlencoding::decode(f).map(|s| s.into_owned()).unwrap_or_else(|_| f.to_string()))
        .unwrap_or_else(|| server.clone());

    let mut config = json!({
        "name": name,
        "type": protocol,
        "server": server,
        "port": port,
    });
    if !secret.is_empty() {
        let key = if protocol == "vless" { "uuid" } else { "password" };
        config[key] = Value::String(secret);
    }
    for (k, v) in parsed.query_pairs() {
        config[k.as_ref()] = Value::String(v.into_owned());
    }

    Some(RawNodeConfig {
        name,
        server,
        port,
        protocol: protocol.to_string(),
        config,
    })
}

/// Best-effort country code from a node display name.
pub fn country_from_name(name: &str) -> Option<String> {
    const COUNTRIES: &[(&str, &[&str])] = &[
        ("HK", &["香港", "HK", "HONG KONG"]),
        ("US", &["美国", "US", "USA", "UNITED STATES"]),
        ("JP", &["日本", "JP", "JAPAN"]),
        ("SG", &["新加坡", "SG", "SINGAPORE"]),
        ("UK", &["英国", "UK", "UNITED KINGDOM"]),
        ("DE", &["德国", "DE", "GERMANY"]),
    ];

    let upper = name.to_uppercase();
    for (code, keywords) in COUNTRIES {
        for keyword in *keywords {
            if upper.contains(keyword) {
                return Some((*code).to_string());
            }
        }
    }
    None
}
