#![cfg(feature = "amazon")]

use std::io::Write;

use cloudglue::AwsAuth;
use tempfile::NamedTempFile;

fn credentials_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "[example-org]\n\
         aws_access_key_id = AKIAEXAMPLE\n\
         aws_secret_access_key = secret\n\
         \n\
         [sandbox]\n\
         aws_access_key_id = AKIAEXAMPLE\n\
         aws_secret_access_key = secret\n"
    )
    .unwrap();
    file
}

#[test]
fn test_profiles() {
    let file = credentials_file();
    let auth = AwsAuth::with_credentials_file(Some("example.org"), file.path());
    assert_eq!(auth.profiles().len(), 2);
    assert!(auth.profiles().contains("example-org"));
}

#[test]
fn test_profile_matches_organization_id() {
    let file = credentials_file();
    let auth = AwsAuth::with_credentials_file(Some("example.org"), file.path());
    assert_eq!(auth.profile(None).unwrap().as_deref(), Some("example-org"));
    assert_eq!(auth.profile(Some("other.org")).unwrap(), None);
}

#[test]
fn test_missing_credentials_file() {
    let auth = AwsAuth::with_credentials_file(
        Some("example.org"),
        std::path::Path::new("does-not-exist/credentials"),
    );
    assert!(auth.profiles().is_empty());
    assert_eq!(auth.profile(None).unwrap(), None);
}

#[tokio::test]
async fn test_config_uses_named_profile() {
    let file = credentials_file();
    let auth = AwsAuth::with_credentials_file(Some("example.org"), file.path());
    // The loader resolves without error even when the profile does not exist
    // in the environment-level configuration.
    let config = auth.config(None, Some("eu-west-1")).await.unwrap();
    assert_eq!(config.region().map(|region| region.as_ref()), Some("eu-west-1"));
}
