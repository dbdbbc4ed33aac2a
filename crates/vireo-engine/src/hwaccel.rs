// crates/vireo-engine/src/hwaccel.rs
//
// Hardware-decode admission check. The engine decodes in software; this
// module exists so that a host wiring up a platform decoder can ask whether
// a given container/codec pair is known-broken on hardware paths and must
// stay on the software decoder regardless.

/// Containers whose timestamp handling breaks hardware decoders.
const BLACKLIST_FORMATS: &[&str] = &["avi", "flv"];

/// Codecs with known-bad hardware implementations in the wild.
const BLACKLIST_CODECS: &[&str] = &["mpeg4", "msmpeg4v3", "wmv3", "vp6f"];

/// True when the pair must take the software decode path.
pub fn software_only(container: &str, codec: &str) -> bool {
    let container = container.to_ascii_lowercase();
    let codec = codec.to_ascii_lowercase();
    BLACKLIST_FORMATS.iter().any(|f| container.contains(f))
        || BLACKLIST_CODECS.iter().any(|c| codec == *c)
}

/// Container families that only seek reliably to keyframes; user seeks on
/// these always use the backward (fast) phase regardless of the exact flag's
/// phase-2 behaviour.
pub fn keyframe_seek_only(container: &str) -> bool {
    let container = container.to_ascii_lowercase();
    BLACKLIST_FORMATS.iter().any(|f| container.contains(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avi_and_flv_are_software_only() {
        assert!(software_only("avi", "h264"));
        assert!(software_only("flv", "h264"));
        assert!(software_only("AVI", "h264"));
    }

    #[test]
    fn blacklisted_codecs_are_software_only_anywhere() {
        assert!(software_only("mov,mp4,m4a,3gp,3g2,mj2", "mpeg4"));
        assert!(!software_only("mov,mp4,m4a,3gp,3g2,mj2", "h264"));
    }

    #[test]
    fn keyframe_only_containers() {
        assert!(keyframe_seek_only("avi"));
        assert!(keyframe_seek_only("flv"));
        assert!(!keyframe_seek_only("matroska,webm"));
    }
}
