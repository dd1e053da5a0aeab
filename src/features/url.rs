use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::{FeatureVector, URL_COLUMNS};

/// The parts of a URL the lexical features look at. Falls back to treating
/// the whole string as a path when it has no scheme.
struct UrlParts {
    scheme: String,
    hostname: String,
    path: String,
    rest: String,
    explicit_port: bool,
}

impl UrlParts {
    fn split(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(parsed) => {
                let hostname = parsed
                    .host_str()
                    .unwrap_or_default()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .to_lowercase();
                let path = parsed.path().to_string();
                let rest = format!(
                    "{}{}{}",
                    path,
                    parsed.query().unwrap_or_default(),
                    parsed.fragment().unwrap_or_default()
                );
                UrlParts {
                    scheme: parsed.scheme().to_string(),
                    hostname,
                    path,
                    rest,
                    explicit_port: parsed.port().is_some(),
                }
            }
            Err(_) => UrlParts {
                scheme: String::new(),
                hostname: String::new(),
                path: raw.to_string(),
                rest: raw.to_string(),
                explicit_port: false,
            },
        }
    }
}

fn word_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap())
}

fn embedded_scheme() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://").unwrap())
}

fn file_extension() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.([a-zA-Z0-9]+)$").unwrap())
}

fn words(s: &str) -> Vec<&str> {
    word_split().split(s).filter(|w| !w.is_empty()).collect()
}

fn digit_ratio(s: &str) -> f64 {
    let len = s.chars().count();
    if len == 0 {
        return 0.0;
    }
    s.chars().filter(|c| c.is_ascii_digit()).count() as f64 / len as f64
}

fn word_stats(words: &[&str]) -> (usize, usize, f64) {
    let lens: Vec<usize> = words.iter().map(|w| w.len()).collect();
    let shortest = lens.iter().copied().min().unwrap_or(0);
    let longest = lens.iter().copied().max().unwrap_or(0);
    let avg = if lens.is_empty() {
        0.0
    } else {
        lens.iter().sum::<usize>() as f64 / lens.len() as f64
    };
    (shortest, longest, avg)
}

fn has_repeated_char(s: &str) -> bool {
    s.chars().zip(s.chars().skip(1)).any(|(a, b)| a == b)
}

/// Lexical features of a URL string. An empty URL yields the defaults.
pub fn extract(raw: &str) -> FeatureVector {
    let mut f = FeatureVector::defaults(URL_COLUMNS);
    let raw = raw.trim();
    if raw.is_empty() {
        return f;
    }

    let parts = UrlParts::split(raw);
    let host = parts.hostname.as_str();
    let is_ip = !host.is_empty() && host.parse::<IpAddr>().is_ok();

    f.set("length_url", raw.chars().count());
    f.set("length_hostname", host.chars().count());
    f.set("ip", is_ip);
    f.set("nb_dots", host.matches('.').count());

    let counted = [
        ("nb_hyphens", '-'),
        ("nb_at", '@'),
        ("nb_qm", '?'),
        ("nb_and", '&'),
        ("nb_or", '|'),
        ("nb_eq", '='),
        ("nb_underscore", '_'),
        ("nb_tilde", '~'),
        ("nb_percent", '%'),
        ("nb_slash", '/'),
        ("nb_star", '*'),
        ("nb_colon", ':'),
        ("nb_comma", ','),
        ("nb_semicolumn", ';'),
        ("nb_dollar", '$'),
        ("nb_space", ' '),
    ];
    for (name, ch) in counted {
        f.set(name, raw.matches(ch).count());
    }

    f.set("nb_www", host.contains("www"));
    f.set("nb_com", host.contains(".com"));
    f.set("nb_dslash", parts.rest.contains("//"));
    f.set("http_in_path", embedded_scheme().is_match(&parts.rest));
    f.set("https_token", parts.scheme == "https");
    f.set("ratio_digits_url", digit_ratio(raw));
    f.set("ratio_digits_host", digit_ratio(host));
    f.set("punycode", host.starts_with("xn--"));
    f.set("port", parts.explicit_port);

    let labels: Vec<&str> = host.split('.').collect();
    let tld = if host.contains('.') {
        labels.last().copied().unwrap_or_default()
    } else {
        ""
    };
    let subdomain_labels: &[&str] = if host.contains('.') {
        &labels[..labels.len() - 1]
    } else {
        &[]
    };
    f.set(
        "tld_in_path",
        !tld.is_empty() && parts.path.to_lowercase().contains(tld),
    );
    f.set(
        "tld_in_subdomain",
        !tld.is_empty() && subdomain_labels.iter().any(|l| l.contains(tld)),
    );

    let nb_subdomains = if is_ip || host.is_empty() {
        0
    } else {
        let dots = host.matches('.').count();
        let mut n = dots.saturating_sub(1);
        if dots >= 1 && labels[0].contains("www") {
            n = n.saturating_sub(1);
        }
        n
    };
    f.set("nb_subdomains", nb_subdomains);
    // Deep nesting whose labels carry digits or hyphens.
    f.set(
        "abnormal_subdomain",
        nb_subdomains > 2
            && subdomain_labels
                .iter()
                .any(|l| l.chars().any(|c| c.is_ascii_digit() || c == '-')),
    );
    f.set(
        "prefix_suffix",
        host.contains('-') && !host.starts_with('-') && !host.ends_with('-'),
    );
    f.set("path_extension", file_extension().is_match(&parts.path));

    let all_words = words(raw);
    let host_words = words(host);
    let path_words = words(&parts.rest);

    let (_, longest_raw, avg_raw) = word_stats(&all_words);
    let (shortest_host, longest_host, avg_host) = word_stats(&host_words);
    let (shortest_path, longest_path, avg_path) = word_stats(&path_words);

    f.set(
        "length_words_raw",
        all_words.iter().map(|w| w.len()).sum::<usize>(),
    );
    f.set("char_repeat", has_repeated_char(raw));
    f.set("shortest_word_host", shortest_host);
    f.set("shortest_word_path", shortest_path);
    f.set("longest_words_raw", longest_raw);
    f.set("longest_word_host", longest_host);
    f.set("longest_word_path", longest_path);
    f.set("avg_words_raw", avg_raw);
    f.set("avg_word_host", avg_host);
    f.set("avg_word_path", avg_path);

    f
}
