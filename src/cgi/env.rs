//! The CGI/1.1 meta-variables for a request

use crate::server::Request;
use crate::uri::strip_mount;

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

pub const SERVER_SOFTWARE: &str =
    concat!("cgi-server/", env!("CARGO_PKG_VERSION"));

/// Per-script facts that do not depend on the request
#[derive(Debug, Clone)]
pub struct ScriptContext<'a> {
    pub script: &'a Path,
    /// Mount prefix; becomes `SCRIPT_NAME`
    pub mount: &'a str,
    /// `PATH` for the script; `None` leaves it unset
    pub path_env: Option<&'a OsStr>
}

/// The environment a script runs with, and nothing else
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: BTreeMap<String, OsString>
}

impl CgiEnvironment {
    pub fn build(req: &Request, ctx: &ScriptContext) -> CgiEnvironment {
        let mut vars = BTreeMap::new();
        let mut set = |name: &str, value: OsString| {
            vars.insert(String::from(name), value);
        };

        let script_name = ctx.mount.trim_end_matches('/');
        let path_info = strip_mount(&req.path, ctx.mount)
            .unwrap_or(&req.path[..]);

        set("GATEWAY_INTERFACE", OsString::from("CGI/1.1"));
        set("SERVER_SOFTWARE", OsString::from(SERVER_SOFTWARE));
        set("SERVER_PROTOCOL", OsString::from(req.protocol()));
        set("SERVER_NAME", OsString::from(server_name(req)));
        set("SERVER_PORT", OsString::from(req.local_addr.port().to_string()));
        set("REQUEST_METHOD", OsString::from(req.method.as_str()));
        set("REQUEST_URI", OsString::from(req.target.as_str()));
        set("SCRIPT_NAME", OsString::from(script_name));
        set("SCRIPT_FILENAME", ctx.script.as_os_str().to_os_string());
        set("PATH_INFO", OsString::from_vec(path_info.to_vec()));
        set("QUERY_STRING", OsString::from(req.query.as_str()));
        set("REMOTE_ADDR", OsString::from(req.remote_addr.ip().to_string()));
        set("REMOTE_HOST", OsString::from(req.remote_addr.ip().to_string()));
        set("REMOTE_PORT", OsString::from(req.remote_addr.port().to_string()));

        if let Some(value) = req.headers.get("Content-Type") {
            set("CONTENT_TYPE", bytes(value));
        }

        if !req.body.is_empty() || req.headers.contains("Content-Length") {
            set("CONTENT_LENGTH", OsString::from(req.body.len().to_string()));
        }

        for (name, _) in &req.headers {
            if !passed_through(name) {
                debug!("Not passing header {:?} to the script", name);
                continue;
            }

            let var = format!("HTTP_{}", name.replace("-", "_")
                              .to_ascii_uppercase());
            if vars.contains_key(&var) {
                continue;
            }

            let joined = req.headers.get_all(name)
                .collect::<Vec<_>>()
                .join(&b", "[..]);
            vars.insert(var, OsString::from_vec(joined));
        }

        if let Some(path) = ctx.path_env {
            vars.insert(String::from("PATH"), path.to_os_string());
        }

        CgiEnvironment { vars }
    }

    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.vars.get(name).map(OsString::as_os_str)
    }
}

impl<'a> IntoIterator for &'a CgiEnvironment {
    type Item = (&'a String, &'a OsString);
    type IntoIter = btree_map::Iter<'a, String, OsString>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

/// Whether a request header becomes an `HTTP_` variable.
///
/// Names with `_` would collide with their `-` spelling, and `Proxy` would
/// become `HTTP_PROXY`, which HTTP clients in the script read as their proxy.
fn passed_through(name: &str) -> bool {
    !name.contains('_') && !name.eq_ignore_ascii_case("Proxy")
}

fn bytes(value: &[u8]) -> OsString {
    OsStr::from_bytes(value).to_os_string()
}

/// The `Host` header without its port, or the address we were reached on
fn server_name(req: &Request) -> String {
    match req.headers.get_str("Host").map(str::trim) {
        Some(host) if !host.is_empty() => {
            if host.starts_with('[') {
                // IPv6 literal
                match host.find(']') {
                    Some(end) => String::from(&host[.. end + 1]),
                    None => String::from(host)
                }
            }
            else {
                String::from(host.split(':').next().unwrap_or(host))
            }
        },
        _ => req.local_addr.ip().to_string()
    }
}
