//! URL host substitution
//!
//! `http://api/v1/items?page=2` becomes `http://10.0.0.1:8080/v1/items?page=2`
//! when `api` resolves. Inputs whose host is not a registry name are left
//! alone, as is every input whose lookup fails.

use crate::endpoint::Endpoint;
use crate::resolver::ResolutionService;
use tracing::warn;
use url::Url;

/// The pieces of a URL that survive host substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UrlParts {
    scheme: Option<String>,
    host: String,
    path: String,
    query: Option<String>,
}

impl UrlParts {
    /// Split `input`, which is either a URL with `//` or a bare `host[:port]`.
    fn parse(input: &str) -> Option<Self> {
        let Some((_, after_scheme)) = input.split_once("//") else {
            let host = split_host_port(input);
            return (!host.is_empty()).then(|| Self {
                scheme: None,
                host: host.to_string(),
                path: String::new(),
                query: None,
            });
        };

        let parsed = Url::parse(input).ok()?;
        let host = parsed.host_str()?.trim_matches(['[', ']']).to_string();

        // Special schemes report "/" for an empty path; keep the input's shape.
        let path = if after_scheme.contains('/') {
            parsed.path().to_string()
        } else {
            String::new()
        };

        Some(Self {
            scheme: Some(parsed.scheme().to_string()),
            host,
            path,
            query: parsed.query().filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    fn with_endpoint(&self, endpoint: &Endpoint) -> String {
        let mut out = match &self.scheme {
            Some(scheme) => format!("{scheme}://{endpoint}"),
            None => endpoint.to_string(),
        };
        out.push_str(&self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        out
    }
}

fn split_host_port(input: &str) -> &str {
    match input.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host.trim_matches(['[', ']']),
        _ => input,
    }
}

/// Whether `host` names something the registry can resolve.
///
/// Single labels other than `localhost` are service names; dotted hosts
/// qualify only when they end in the registry `domain`.
pub fn should_discover(host: &str, domain: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    match host.rsplit_once('.') {
        None => host != "localhost",
        Some((_, last)) => last == domain,
    }
}

impl ResolutionService {
    /// Replace the host of `input` with a discovered endpoint.
    ///
    /// Scheme, path and query are kept; the input port is replaced.
    /// Returns `input` unchanged when the host is not a registry name or
    /// cannot be resolved.
    pub async fn rewrite_url(&self, input: &str) -> String {
        let Some(parts) = UrlParts::parse(input) else {
            return input.to_string();
        };
        if !should_discover(&parts.host, self.domain()) {
            return input.to_string();
        }

        match self.resolve_one(&parts.host).await {
            Ok(endpoint) => parts.with_endpoint(&endpoint),
            Err(e) => {
                warn!(url = input, error = %e, "url discovery failed");
                input.to_string()
            }
        }
    }
}
