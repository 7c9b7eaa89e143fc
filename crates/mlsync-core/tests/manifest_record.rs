use mlsync_core::manifest::{ManifestRecord, ManifestRecordError, MANIFEST_SCHEMA_VERSION};

#[test]
fn manifest_record_requires_src_url() {
    let r = ManifestRecord::new("   ", "tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00.jpg");
    assert_eq!(r.validate(), Err(ManifestRecordError::EmptySrcUrl));
}

#[test]
fn manifest_record_requires_dst_key() {
    let r = ManifestRecord::new("https://example.com/a.jpg", "");
    assert_eq!(r.validate(), Err(ManifestRecordError::EmptyDstKey));
}

#[test]
fn manifest_record_rejects_future_schema() {
    let mut r = ManifestRecord::new("https://example.com/a.jpg", "tuttle_twins/ML/a");
    r.schema_version = MANIFEST_SCHEMA_VERSION + 1;
    assert_eq!(
        r.validate(),
        Err(ManifestRecordError::UnsupportedVersion(MANIFEST_SCHEMA_VERSION + 1))
    );
}

#[test]
fn manifest_record_reads_unversioned_lines() -> anyhow::Result<()> {
    let line = r#"{"src_url": "https://s3.us-west-2.amazonaws.com/media.tuttletwins/stamps/s01e01/TT_S01_E01_FRM-00-00-08-11.jpg", "dst_key": "tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg"}"#;
    let r: ManifestRecord = serde_json::from_str(line)?;
    assert_eq!(r.schema_version, 0);
    assert_eq!(r.validate(), Ok(()));
    Ok(())
}

#[test]
fn manifest_record_writes_current_schema() -> anyhow::Result<()> {
    let r = ManifestRecord::new("s3://media/stamps/a.jpg", "tuttle_twins/ML/test/Rare/a.jpg");
    let line = serde_json::to_string(&r)?;
    assert!(line.starts_with(r#"{"schema_version":1,"#));
    let back: ManifestRecord = serde_json::from_str(&line)?;
    assert_eq!(back, r);
    Ok(())
}
