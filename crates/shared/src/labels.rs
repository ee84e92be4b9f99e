//! Display labels for report breakdowns

/// Placeholder for blank geography, browser and unmapped click values
pub const UNKNOWN_LABEL: &str = "unknown";

/// Source label for sessions without a referrer
pub const DIRECT_ACCESS_LABEL: &str = "direct access";

/// Source label for referrers that are present but carry no parseable host
pub const OTHER_EXTERNAL_LABEL: &str = "other external link";

/// Trim a free-text label, mapping blank values to [`UNKNOWN_LABEL`]
pub fn normalize_label(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_LABEL.to_string(),
    }
}

// =============================================================================
// Referrer Sources
// =============================================================================

enum HostRule {
    /// Any host with this label, whatever the TLD (`google` matches `www.google.co.uk`)
    Brand(&'static str),
    /// This exact domain or any of its subdomains
    Domain(&'static str),
}

const SOURCE_RULES: &[(HostRule, &str)] = &[
    // Search engines
    (HostRule::Brand("google"), "Google"),
    (HostRule::Brand("bing"), "Bing"),
    (HostRule::Brand("yahoo"), "Yahoo"),
    (HostRule::Brand("duckduckgo"), "DuckDuckGo"),
    (HostRule::Brand("ecosia"), "Ecosia"),
    (HostRule::Brand("qwant"), "Qwant"),
    (HostRule::Brand("baidu"), "Baidu"),
    (HostRule::Brand("yandex"), "Yandex"),
    // Social networks
    (HostRule::Brand("facebook"), "Facebook"),
    (HostRule::Domain("fb.com"), "Facebook"),
    (HostRule::Domain("fb.me"), "Facebook"),
    (HostRule::Brand("instagram"), "Instagram"),
    (HostRule::Brand("twitter"), "X (Twitter)"),
    (HostRule::Domain("x.com"), "X (Twitter)"),
    (HostRule::Domain("t.co"), "X (Twitter)"),
    (HostRule::Brand("linkedin"), "LinkedIn"),
    (HostRule::Domain("lnkd.in"), "LinkedIn"),
    (HostRule::Brand("pinterest"), "Pinterest"),
    (HostRule::Brand("youtube"), "YouTube"),
    (HostRule::Domain("youtu.be"), "YouTube"),
    (HostRule::Brand("tiktok"), "TikTok"),
    (HostRule::Brand("reddit"), "Reddit"),
    (HostRule::Brand("whatsapp"), "WhatsApp"),
    (HostRule::Domain("wa.me"), "WhatsApp"),
];

impl HostRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            // Brand labels never match the last label (the TLD)
            Self::Brand(brand) => {
                let labels: Vec<&str> = host.split('.').collect();
                labels.len() > 1 && labels[..labels.len() - 1].contains(brand)
            }
            Self::Domain(domain) => {
                host == *domain || host.ends_with(&format!(".{}", domain))
            }
        }
    }
}

/// Classify a sticky referrer into a traffic source label
pub fn source_label(referrer: Option<&str>) -> String {
    let referrer = match referrer.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return DIRECT_ACCESS_LABEL.to_string(),
    };

    let host = match url::Url::parse(referrer)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    {
        Some(h) if !h.is_empty() => h,
        _ => return OTHER_EXTERNAL_LABEL.to_string(),
    };

    for (rule, label) in SOURCE_RULES {
        if rule.matches(&host) {
            return (*label).to_string();
        }
    }

    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

// =============================================================================
// Click Labels
// =============================================================================

const CLICK_TYPE_LABELS: &[(&str, &str)] = &[
    ("link", "Link"),
    ("button", "Button"),
    ("menu", "Menu"),
    ("image", "Image"),
    ("social", "Social link"),
    ("cta", "Call to action"),
    ("form", "Form"),
    ("video", "Video"),
    ("gallery", "Gallery"),
    ("phone", "Phone"),
    ("email", "Email"),
    ("logo", "Logo"),
];

/// Human page name for a path: `/` is "Home", otherwise the last segment
pub fn page_name(path: Option<&str>) -> String {
    let path = path.unwrap_or("/");
    // Drop query string and fragment
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let segment = path.split('/').filter(|s| !s.is_empty()).last();
    let Some(segment) = segment else {
        return "Home".to_string();
    };

    let words = segment.replace(['-', '_'], " ");
    let words = words.trim();
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Home".to_string(),
    }
}

/// Resolve a click `element_id` of the form `type|detail` into a display label.
///
/// Unmapped or malformed values become `"<Page> > unknown"` so they are still
/// counted.
pub fn click_label(path: Option<&str>, element_id: Option<&str>) -> String {
    let page = page_name(path);
    let unknown = format!("{} > {}", page, UNKNOWN_LABEL);

    let Some(raw) = element_id.map(str::trim).filter(|e| !e.is_empty()) else {
        return unknown;
    };
    let Some((kind, detail)) = raw.split_once('|') else {
        return unknown;
    };
    let kind = kind.trim().to_lowercase();
    let Some((_, type_label)) = CLICK_TYPE_LABELS.iter().find(|(k, _)| *k == kind) else {
        return unknown;
    };

    let detail = detail.trim();
    if detail.is_empty() {
        format!("{} > {}", page, type_label)
    } else {
        format!("{} > {}: {}", page, type_label, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label(Some("France")), "France");
        assert_eq!(normalize_label(Some("  ")), UNKNOWN_LABEL);
        assert_eq!(normalize_label(Some("")), UNKNOWN_LABEL);
        assert_eq!(normalize_label(None), UNKNOWN_LABEL);
    }

    #[test]
    fn test_source_known_engines_and_networks() {
        assert_eq!(source_label(Some("https://www.google.com/search?q=x")), "Google");
        assert_eq!(source_label(Some("https://google.co.uk/")), "Google");
        assert_eq!(source_label(Some("https://news.google.fr/")), "Google");
        assert_eq!(source_label(Some("https://m.facebook.com/story")), "Facebook");
        assert_eq!(source_label(Some("https://l.instagram.com/")), "Instagram");
        assert_eq!(source_label(Some("https://t.co/abc")), "X (Twitter)");
        assert_eq!(source_label(Some("https://www.linkedin.com/feed")), "LinkedIn");
        assert_eq!(source_label(Some("https://duckduckgo.com/")), "DuckDuckGo");
    }

    #[test]
    fn test_source_unknown_host_strips_www() {
        assert_eq!(source_label(Some("https://www.example.org/page")), "example.org");
        assert_eq!(source_label(Some("http://blog.example.org")), "blog.example.org");
        // Brand match never uses the TLD position
        assert_eq!(source_label(Some("https://shop.google")), "shop.google");
    }

    #[test]
    fn test_source_direct_and_other() {
        assert_eq!(source_label(None), DIRECT_ACCESS_LABEL);
        assert_eq!(source_label(Some("   ")), DIRECT_ACCESS_LABEL);
        assert_eq!(source_label(Some("not a url")), OTHER_EXTERNAL_LABEL);
        assert_eq!(source_label(Some("mailto:someone@example.com")), OTHER_EXTERNAL_LABEL);
    }

    #[test]
    fn test_page_name() {
        assert_eq!(page_name(Some("/")), "Home");
        assert_eq!(page_name(None), "Home");
        assert_eq!(page_name(Some("/about-us")), "About us");
        assert_eq!(page_name(Some("/services/web_design/?ref=x")), "Web design");
    }

    #[test]
    fn test_click_label_mapped() {
        assert_eq!(click_label(Some("/"), Some("button|Contact")), "Home > Button: Contact");
        assert_eq!(click_label(Some("/gallery"), Some("IMAGE|")), "Gallery > Image");
        assert_eq!(click_label(Some("/"), Some("cta|Book now")), "Home > Call to action: Book now");
    }

    #[test]
    fn test_click_label_unknown_is_explicit() {
        assert_eq!(click_label(Some("/"), None), "Home > unknown");
        assert_eq!(click_label(Some("/"), Some("no-pipe")), "Home > unknown");
        assert_eq!(click_label(Some("/contact"), Some("widget|x")), "Contact > unknown");
    }
}
