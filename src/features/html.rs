use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{FeatureVector, HTML_COLUMNS};

const PHISH_KEYWORDS: &[&str] = &[
    "login",
    "signin",
    "account update",
    "verify account",
    "security alert",
    "password",
    "bank",
    "paypal",
    "credit card",
    "緊急",
    "驗證",
    "登入",
    "帳戶更新",
    "安全警告",
    "密碼",
];

const SHORTENERS: &[&str] = &["bit.ly", "tinyurl", "goo.gl", "t.co", "fb.me", "is.gd"];

const GENERIC_TLDS: &[&str] = &["com", "org", "net", "edu", "gov", "mil"];

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

fn copyright_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)©|copyright|all rights reserved").unwrap())
}

fn footer_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)footer|copyright").unwrap())
}

/// Host plus explicit port, the unit links are compared on.
fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Registrable-looking core of a domain: `paypal` for `www.paypal.com`.
fn core_domain(base_domain: &str) -> &str {
    let parts: Vec<&str> = base_domain.split('.').collect();
    match parts.len() {
        0 | 1 => parts.first().copied().unwrap_or_default(),
        n if GENERIC_TLDS.contains(&parts[n - 1]) => parts[n - 2],
        2 => parts[0],
        n => parts[n - 3],
    }
}

struct Link<'a> {
    element: ElementRef<'a>,
    href: &'a str,
    resolved: Option<Url>,
    external: bool,
}

impl<'a> Link<'a> {
    fn resolved_str(&self) -> &str {
        self.resolved.as_ref().map(Url::as_str).unwrap_or(self.href)
    }

    fn host(&self) -> &str {
        self.resolved
            .as_ref()
            .and_then(|u| u.host_str())
            .unwrap_or_default()
    }

    fn scheme(&self) -> &str {
        self.resolved.as_ref().map(Url::scheme).unwrap_or_default()
    }
}

fn is_external(page: &Url, page_netloc: &str, target: &str) -> (Option<Url>, bool) {
    match page.join(target) {
        Ok(resolved) => {
            let external = netloc(&resolved) != page_netloc;
            (Some(resolved), external)
        }
        Err(_) => (None, true),
    }
}

/// Structural features of a fetched page. `html` is the raw markup retrieved
/// for `page_url`. An unparsable page URL yields the defaults.
pub fn extract(page_url: &str, html: &str) -> FeatureVector {
    let mut f = FeatureVector::defaults(HTML_COLUMNS);
    let Ok(page) = Url::parse(page_url.trim()) else {
        return f;
    };
    let page_netloc = netloc(&page);
    let host = page.host_str().unwrap_or_default();
    let base_domain = host.strip_prefix("www.").unwrap_or(host).to_lowercase();

    let doc = Html::parse_document(html);

    let meta_refresh = doc.select(&selector("meta[http-equiv]")).any(|m| {
        m.value()
            .attr("http-equiv")
            .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
            && m.value()
                .attr("content")
                .is_some_and(|c| c.to_lowercase().contains("url="))
    });
    f.set("has_meta_refresh", meta_refresh);

    let js_redirect = doc
        .select(&selector("script"))
        .any(|s| s.text().any(|t| t.contains("window.location.href")));
    f.set("has_js_redirect", js_redirect);

    let page_text = doc.root_element().text().collect::<String>().to_lowercase();
    f.set(
        "phish_hints",
        PHISH_KEYWORDS.iter().any(|kw| page_text.contains(kw)),
    );

    let title = doc
        .select(&selector("title"))
        .next()
        .map(|t| t.text().collect::<String>());
    let title_lower = title.as_deref().unwrap_or_default().to_lowercase();
    let core = core_domain(&base_domain);
    let description_has_core = doc
        .select(&selector(r#"meta[name="description"]"#))
        .next()
        .and_then(|m| m.value().attr("content"))
        .is_some_and(|c| c.to_lowercase().contains(core));
    f.set(
        "domain_in_brand",
        !core.is_empty() && (title_lower.contains(core) || description_has_core),
    );

    let links: Vec<Link> = doc
        .select(&selector("a[href]"))
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let (resolved, external) = is_external(&page, &page_netloc, href);
            Some(Link { element, href, resolved, external })
        })
        .collect();
    let total_links = links.len();
    f.set("nb_hyperlinks", total_links);

    let external_links = links.iter().filter(|l| l.external).count();
    if total_links > 0 {
        let internal = total_links - external_links;
        f.set("ratio_intHyperlinks", internal as f64 / total_links as f64);
        f.set("ratio_extHyperlinks", external_links as f64 / total_links as f64);
    }

    let outbound: Vec<&Link> = links
        .iter()
        .filter(|l| !l.href.starts_with('#') && l.external)
        .collect();

    let redirecting = outbound
        .iter()
        .filter(|l| {
            let onclick = l.element.value().attr("onclick").unwrap_or_default();
            if onclick.contains("window.location") {
                return true;
            }
            l.element.value().attr("target") == Some("_blank")
                && l.element
                    .text()
                    .collect::<String>()
                    .to_lowercase()
                    .contains("redirect")
        })
        .count();
    let erroring = outbound
        .iter()
        .filter(|l| {
            let target = l.resolved_str().to_lowercase();
            target.contains("error")
                || target.contains("404")
                || target.contains("notfound")
                || l.host().is_empty()
        })
        .count();
    if total_links > 0 {
        f.set("ratio_extRedirection", redirecting as f64 / total_links as f64);
        f.set("ratio_extErrors", erroring as f64 / total_links as f64);
    }

    let unsafe_anchor = outbound.iter().any(|l| {
        let host = l.host();
        let bad_scheme = !matches!(l.scheme(), "http" | "https" | "");
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
            || bad_scheme
            || SHORTENERS.iter().any(|s| host.to_lowercase().contains(s))
    });
    f.set("safe_anchor", !unsafe_anchor);

    let favicon_external = doc
        .select(&selector("link[rel][href]"))
        .find(|l| {
            l.value()
                .attr("rel")
                .is_some_and(|r| r.to_lowercase().contains("icon"))
        })
        .and_then(|l| l.value().attr("href"))
        .is_some_and(|href| is_external(&page, &page_netloc, href).1);
    f.set("external_favicon", favicon_external);

    let links_in_tags: usize = doc
        .select(&selector("a, script, img, link, iframe, form"))
        .map(|tag| {
            let el = tag.value();
            usize::from(el.attr("href").is_some())
                + usize::from(el.attr("src").is_some())
                + usize::from(el.name() == "form" && el.attr("action").is_some())
        })
        .sum();
    f.set("links_in_tags", links_in_tags);

    let media: Vec<ElementRef> = doc.select(&selector("img, audio, video, source")).collect();
    if !media.is_empty() {
        let external_media = media
            .iter()
            .filter_map(|m| m.value().attr("src").or_else(|| m.value().attr("href")))
            .filter(|src| !src.is_empty())
            .filter(|src| is_external(&page, &page_netloc, src).1)
            .count();
        f.set("ratio_extMedia", external_media as f64 / media.len() as f64);
    }

    let title_blank = title.as_deref().map_or(true, |t| t.trim().is_empty());
    f.set("empty_title", title_blank);
    f.set(
        "domain_in_title",
        !base_domain.is_empty() && title_lower.contains(&base_domain),
    );

    let copyright_text = doc
        .tree
        .nodes()
        .filter_map(|n| n.value().as_text())
        .filter(|t| copyright_re().is_match(t))
        .any(|t| t.to_lowercase().contains(&base_domain));
    let footer_mentions = doc
        .select(&selector("div[class], footer[class]"))
        .filter(|el| {
            el.value()
                .attr("class")
                .is_some_and(|c| footer_class_re().is_match(c))
        })
        .any(|el| {
            el.text()
                .collect::<String>()
                .to_lowercase()
                .contains(&base_domain)
        });
    f.set(
        "domain_with_copyright",
        !base_domain.is_empty() && (copyright_text || footer_mentions),
    );

    f.set("feature_extracted", true);
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureValue;

    fn num(f: &FeatureVector, name: &str) -> f64 {
        f.get(name).and_then(FeatureValue::as_number).unwrap()
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn core_domain_rules() {
        assert_eq!(core_domain("paypal.com"), "paypal");
        assert_eq!(core_domain("login.paypal.com"), "paypal");
        assert_eq!(core_domain("bank.co.uk"), "bank");
        assert_eq!(core_domain("example.io"), "example");
        assert_eq!(core_domain("localhost"), "localhost");
    }

    #[test]
    fn phishing_fixture() {
        let f = extract("http://secure-paypa1.com/login", &fixture("phishing_login"));
        assert_eq!(num(&f, "feature_extracted"), 1.0);
        assert_eq!(num(&f, "phish_hints"), 1.0);
        assert_eq!(num(&f, "nb_hyperlinks"), 4.0);
        // /help is internal, the other three point off-site
        assert_eq!(num(&f, "ratio_intHyperlinks"), 0.25);
        assert_eq!(num(&f, "ratio_extHyperlinks"), 0.75);
        assert_eq!(num(&f, "safe_anchor"), 0.0);
        assert_eq!(num(&f, "external_favicon"), 1.0);
        assert_eq!(num(&f, "has_meta_refresh"), 1.0);
        assert_eq!(num(&f, "has_js_redirect"), 1.0);
        assert_eq!(num(&f, "empty_title"), 0.0);
        assert_eq!(num(&f, "domain_in_title"), 0.0);
        assert_eq!(num(&f, "ratio_extMedia"), 0.5);
    }

    #[test]
    fn benign_fixture() {
        let f = extract("https://www.example.com/", &fixture("benign_home"));
        assert_eq!(num(&f, "phish_hints"), 0.0);
        assert_eq!(num(&f, "domain_in_brand"), 1.0);
        assert_eq!(num(&f, "domain_in_title"), 1.0);
        assert_eq!(num(&f, "domain_with_copyright"), 1.0);
        assert_eq!(num(&f, "safe_anchor"), 1.0);
        assert_eq!(num(&f, "ratio_intHyperlinks"), 1.0);
        assert_eq!(num(&f, "has_meta_refresh"), 0.0);
        assert_eq!(num(&f, "has_js_redirect"), 0.0);
    }

    #[test]
    fn missing_title_is_empty() {
        let f = extract("https://a.test/", "<html><body><p>hi</p></body></html>");
        assert_eq!(num(&f, "empty_title"), 1.0);
        assert_eq!(num(&f, "nb_hyperlinks"), 0.0);
        assert_eq!(num(&f, "ratio_intHyperlinks"), 0.0);
    }

    #[test]
    fn links_in_tags_counts_each_attribute() {
        let html = r#"<html><head><link rel="stylesheet" href="/s.css"><script src="/a.js"></script></head>
            <body><a href="/x">x</a><img src="/i.png"><form action="/post"></form><iframe src="/f"></iframe></body></html>"#;
        let f = extract("https://a.test/", html);
        assert_eq!(num(&f, "links_in_tags"), 6.0);
    }

    #[test]
    fn unparsable_page_url_gives_defaults() {
        assert_eq!(extract("not a url", "<html></html>"), FeatureVector::defaults(HTML_COLUMNS));
    }
}
