//! PSSH extraction from raw MPD bodies. A canonical Widevine PSSH string is
//! exactly 76 base64 characters; anything longer carries a PlayReady WRM
//! header.

use std::collections::BTreeSet;

use tracing::warn;

use super::xml::parse_document;
use super::ManifestResult;

pub const WIDEVINE_PSSH_LEN: usize = 76;

/// Distinct PSSH strings partitioned by DRM kind, duplicates collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsshSet {
    pub widevine: Vec<String>,
    pub playready: Vec<String>,
}

impl PsshSet {
    pub fn is_empty(&self) -> bool {
        self.widevine.is_empty() && self.playready.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.widevine.iter().chain(self.playready.iter())
    }
}

/// Collects every `cenc:pssh` and `mspr:pro` element from an MPD body and
/// partitions them by length.
pub fn extract_pssh(mpd_body: &str) -> ManifestResult<PsshSet> {
    let root = parse_document(mpd_body)?;
    let mut seen = BTreeSet::new();

    for node in root.find_all("pssh") {
        let text = node.text.trim();
        if !text.is_empty() {
            seen.insert(text.to_string());
        }
    }
    for node in root.find_all("pro") {
        let text = node.text.trim();
        if !text.is_empty() {
            seen.insert(text.to_string());
        }
    }

    Ok(partition(seen))
}

fn partition(values: BTreeSet<String>) -> PsshSet {
    let mut set = PsshSet::default();
    for value in values {
        match value.len() {
            WIDEVINE_PSSH_LEN => set.widevine.push(value),
            len if len > WIDEVINE_PSSH_LEN => set.playready.push(value),
            len => warn!(len, "discarding undersized pssh value"),
        }
    }
    set
}

/// Widevine values additionally require the canonical `=` padding.
pub fn is_canonical_widevine(pssh: &str) -> bool {
    pssh.len() == WIDEVINE_PSSH_LEN && pssh.ends_with('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wv_sample() -> String {
        let mut value = "A".repeat(WIDEVINE_PSSH_LEN - 1);
        value.push('=');
        value
    }

    #[test]
    fn partitions_by_length_and_dedups() {
        let wv = wv_sample();
        let pr = "B".repeat(120);
        let body = format!(
            r#"<MPD xmlns:cenc="urn:mpeg:cenc:2013" xmlns:mspr="urn:microsoft:playready">
                 <Period>
                   <AdaptationSet>
                     <ContentProtection><cenc:pssh>{wv}</cenc:pssh></ContentProtection>
                     <ContentProtection><cenc:pssh>{wv}</cenc:pssh></ContentProtection>
                     <ContentProtection><mspr:pro>{pr}</mspr:pro></ContentProtection>
                   </AdaptationSet>
                 </Period>
               </MPD>"#
        );
        let set = extract_pssh(&body).unwrap();
        assert_eq!(set.widevine, vec![wv.clone()]);
        assert_eq!(set.playready, vec![pr]);
        assert!(is_canonical_widevine(&wv));
    }

    #[test]
    fn undersized_values_are_dropped() {
        let body = r#"<MPD xmlns:cenc="urn:mpeg:cenc:2013">
            <ContentProtection><cenc:pssh>tooshort</cenc:pssh></ContentProtection>
        </MPD>"#;
        let set = extract_pssh(body).unwrap();
        assert!(set.is_empty());
    }
}
