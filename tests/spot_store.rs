use anyhow::Result;

use parkwatch::{SpotId, SpotSize, SpotStore};

#[test]
fn store_file_is_a_plain_coordinate_list() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("spots.json");
    std::fs::write(&path, "[[10, 20], [120, 20], [10, 20]]")?;

    let store = SpotStore::load(&path)?;
    let layout = store.layout(SpotSize::default());
    assert_eq!(layout.len(), 3);
    // Duplicates are kept and numbered like any other entry.
    let third = layout.get(SpotId(3)).map(|s| (s.x, s.y));
    assert_eq!(third, Some((10, 20)));
    assert_eq!(layout.get(SpotId(3)).map(|s| s.id.to_string()), Some("Spot 3".to_string()));
    Ok(())
}

#[test]
fn edits_persist_and_renumber() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("spots.json");

    let mut store = SpotStore::new(&path);
    store.add(0, 0);
    store.add(200, 0);
    store.add(400, 0);
    store.save()?;

    let mut store = SpotStore::load(&path)?;
    let removed = store.remove_at(250, 20, SpotSize::default());
    assert_eq!(removed, vec![(200, 0)]);
    store.save()?;

    let reloaded = SpotStore::load(&path)?;
    assert_eq!(reloaded.positions(), &[(0, 0), (400, 0)]);
    let layout = reloaded.layout(SpotSize::default());
    assert_eq!(layout.get(SpotId(2)).map(|s| s.x), Some(400));
    assert!(layout.get(SpotId(3)).is_none());

    // No temp file is left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != "spots.json")
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn missing_or_malformed_store_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = SpotStore::load(dir.path().join("nope.json")).unwrap_err();
    assert!(format!("{:#}", missing).contains("failed to read spot store"));

    let path = dir.path().join("spots.json");
    std::fs::write(&path, r#"[{"x": 1, "y": 2}]"#)?;
    assert!(SpotStore::load(&path).is_err());

    std::fs::write(&path, "[[1, -2]]")?;
    assert!(SpotStore::load(&path).is_err());
    Ok(())
}
