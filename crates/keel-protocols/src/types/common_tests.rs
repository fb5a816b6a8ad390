use super::*;

#[test]
fn test_version_display() {
    assert_eq!(Version::new(1, 2, 3).to_string(), "1.2.3");

    let mut pre = Version::new(2, 0, 0);
    pre.prerelease = Some("rc.1".to_string());
    assert_eq!(pre.to_string(), "2.0.0-rc.1");
}

#[test]
fn test_version_parse() {
    assert_eq!(Version::parse("1.4.2"), Some(Version::new(1, 4, 2)));
    assert_eq!(Version::parse("3"), Some(Version::new(3, 0, 0)));

    let parsed = Version::parse("0.9.0-beta").unwrap();
    assert_eq!(parsed.minor, 9);
    assert_eq!(parsed.prerelease.as_deref(), Some("beta"));
}

#[test]
fn test_version_parse_invalid() {
    assert!(Version::parse("").is_none());
    assert!(Version::parse("a.b.c").is_none());
    assert!(Version::parse("1.2.3.4").is_none());
}

#[test]
fn test_version_ordering() {
    assert!(Version::new(1, 0, 0) < Version::new(1, 0, 1));
    assert!(Version::new(1, 9, 0) < Version::new(2, 0, 0));
}

#[test]
fn test_version_serialization() {
    let json = serde_json::to_string(&Version::new(1, 0, 0)).unwrap();
    assert!(json.contains("\"major\":1"));
    assert!(!json.contains("prerelease"));
}
