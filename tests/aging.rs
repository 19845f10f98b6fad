use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use access_history::changelog::{ChangelogSession, ChangelogSource, Received, StreamFlags};
use access_history::store::link_count;
use access_history::{
    ChangeConsumer, ConsumerConfig, EpochAdvancer, EpochState, Fid, HistoryLayout, ObjectStore,
    Tier, TierLinker, Window,
};
use tempfile::tempdir;

/// A source with nothing to read; these tests only touch directly.
struct IdleSource;

struct IdleSession;

impl ChangelogSession for IdleSession {
    fn set_options(&mut self, _flags: StreamFlags) -> access_history::Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> Received {
        Received::EndOfStream
    }
}

impl ChangelogSource for IdleSource {
    type Session = IdleSession;

    fn open(&self, _device: &str) -> access_history::Result<IdleSession> {
        Ok(IdleSession)
    }

    fn acknowledge(&self, _device: &str, _consumer: &str, _index: u64) -> access_history::Result<()> {
        Ok(())
    }
}

fn setup(root: &Path, interval: u64) -> (EpochAdvancer, ChangeConsumer<IdleSource>) {
    let layout = HistoryLayout::new(root);
    for dir in layout.skeleton() {
        fs::create_dir_all(dir).expect("skeleton");
    }
    let epoch = Arc::new(EpochState::new(Duration::from_secs(interval)));
    let advancer = EpochAdvancer::new(layout.clone(), Arc::clone(&epoch));
    let consumer = ChangeConsumer::new(
        IdleSource,
        ObjectStore::new(layout.fids_dir()),
        TierLinker::new(),
        epoch,
        ConsumerConfig::new("mdt0", "cl1"),
    );
    (advancer, consumer)
}

/// Every `<tier>/<window>/<shard>/<fid>` link below `root`, keyed by FID.
fn tier_links(root: &Path) -> HashMap<String, Vec<String>> {
    let mut links: HashMap<String, Vec<String>> = HashMap::new();
    for tier in [Tier::Active, Tier::Secondary, Tier::Inactive] {
        let tier_dir = root.join(tier.dir_name());
        for window in fs::read_dir(&tier_dir).expect("tier dir") {
            let window = window.expect("window entry");
            let window_name = window.file_name().to_string_lossy().into_owned();
            for shard in fs::read_dir(window.path()).expect("window dir") {
                let shard = shard.expect("shard entry");
                for link in fs::read_dir(shard.path()).expect("shard dir") {
                    let link = link.expect("link entry");
                    links
                        .entry(link.file_name().to_string_lossy().into_owned())
                        .or_default()
                        .push(format!("{}/{}", tier, window_name));
                }
            }
        }
    }
    links
}

#[test]
fn touching_twice_leaves_one_marker_and_one_link() {
    let dir = tempdir().expect("tempdir");
    let (advancer, consumer) = setup(dir.path(), 10);
    advancer.advance(1005).expect("advance");

    let fid = Fid::new(0x200000401, 0xa1, 0);
    let first = consumer.touch(&fid).expect("first touch");
    let second = consumer.touch(&fid).expect("second touch");
    assert_eq!(first, second);
    assert_eq!(
        first,
        dir.path().join("active/1000-1010/00a1").join(fid.to_string())
    );

    let marker = dir.path().join("fids/00a1").join(fid.to_string());
    assert_eq!(link_count(&marker).expect("nlink"), 2);

    let links = tier_links(dir.path());
    assert_eq!(links.len(), 1);
    assert_eq!(links[&fid.to_string()], vec!["active/1000-1010".to_string()]);
}

#[test]
fn degrade_places_windows_by_age() {
    let dir = tempdir().expect("tempdir");
    let (advancer, _consumer) = setup(dir.path(), 10);
    fs::create_dir_all(dir.path().join("active/0-10")).expect("window 0-10");
    fs::create_dir_all(dir.path().join("active/10-20")).expect("window 10-20");

    let report = advancer.advance(25).expect("advance to 20-30");
    assert_eq!(report.opened, Some(Window::new(20, 30)));
    assert_eq!(report.to_inactive, vec![Window::new(0, 10)]);
    assert_eq!(report.to_secondary, vec![Window::new(10, 20)]);
    assert!(dir.path().join("inactive/0-10").is_dir());
    assert!(dir.path().join("secondary/10-20").is_dir());
    assert!(dir.path().join("active/20-30").is_dir());
    assert!(!dir.path().join("active/0-10").exists());
    assert!(!dir.path().join("active/10-20").exists());

    let report = advancer.advance(35).expect("advance to 30-40");
    assert_eq!(report.to_inactive, vec![Window::new(10, 20)]);
    assert_eq!(report.to_secondary, vec![Window::new(20, 30)]);
    assert!(dir.path().join("inactive/10-20").is_dir());
    assert!(dir.path().join("secondary/20-30").is_dir());
}

#[test]
fn windows_a_full_interval_old_skip_secondary() {
    let dir = tempdir().expect("tempdir");
    let (advancer, _consumer) = setup(dir.path(), 10);
    fs::create_dir_all(dir.path().join("active/0-10")).expect("window 0-10");
    fs::create_dir_all(dir.path().join("active/10-20")).expect("window 10-20");

    let report = advancer.advance(30).expect("advance to 30-40");
    assert_eq!(
        report.to_inactive,
        vec![Window::new(0, 10), Window::new(10, 20)]
    );
    assert!(report.to_secondary.is_empty());
    assert!(dir.path().join("inactive/0-10").is_dir());
    assert!(dir.path().join("inactive/10-20").is_dir());
}

#[test]
fn malformed_active_entries_are_left_alone() {
    let dir = tempdir().expect("tempdir");
    let (advancer, _consumer) = setup(dir.path(), 10);
    fs::create_dir_all(dir.path().join("active/garbage")).expect("garbage");
    fs::write(dir.path().join("active/0-10"), b"").expect("file window");

    let report = advancer.advance(1005).expect("advance");
    assert_eq!(report.skipped, 2);
    assert!(dir.path().join("active/garbage").is_dir());
    assert!(dir.path().join("active/0-10").is_file());
}

#[test]
fn link_survives_rollover_in_its_window() {
    let dir = tempdir().expect("tempdir");
    let (advancer, consumer) = setup(dir.path(), 10);
    let fid = Fid::new(0x200000401, 7, 0);

    advancer.advance(1005).expect("advance");
    consumer.touch(&fid).expect("touch");
    advancer.advance(1015).expect("advance");

    let moved = dir
        .path()
        .join("secondary/1000-1010/0007")
        .join(fid.to_string());
    assert!(moved.is_file());
    let marker = dir.path().join("fids/0007").join(fid.to_string());
    assert_eq!(link_count(&marker).expect("nlink"), 2);

    consumer.touch(&fid).expect("touch again");
    assert_eq!(link_count(&marker).expect("nlink"), 3);
}

#[test]
fn touches_racing_rollover_land_in_exactly_one_window() {
    let dir = tempdir().expect("tempdir");
    let (advancer, consumer) = setup(dir.path(), 10);
    advancer.advance(1000).expect("advance");

    let fids: Vec<Fid> = (0..400u32).map(|oid| Fid::new(0x200000401, oid, 0)).collect();
    let consumer = Arc::new(consumer);

    let toucher = {
        let consumer = Arc::clone(&consumer);
        let fids = fids.clone();
        thread::spawn(move || {
            for fid in &fids {
                consumer.touch(fid).expect("touch");
            }
        })
    };
    let roller = thread::spawn(move || {
        for step in 1..=40u64 {
            advancer.advance(1000 + step * 10).expect("advance");
            thread::yield_now();
        }
    });
    toucher.join().expect("toucher");
    roller.join().expect("roller");

    let links = tier_links(dir.path());
    assert_eq!(links.len(), fids.len());
    for fid in &fids {
        let windows = &links[&fid.to_string()];
        assert_eq!(windows.len(), 1, "{fid} linked into {windows:?}");
        let marker = dir
            .path()
            .join("fids")
            .join(fid.shard_name())
            .join(fid.to_string());
        assert_eq!(link_count(&marker).expect("nlink"), 2);
    }
}

#[test]
fn window_is_merged_into_existing_target() {
    let dir = tempdir().expect("tempdir");
    let (advancer, consumer) = setup(dir.path(), 10);
    advancer.advance(1005).expect("advance");
    let touched = Fid::new(0x200000401, 0x1, 0);
    consumer.touch(&touched).expect("touch");

    // Left in secondary by an earlier run.
    let earlier = Fid::new(0x200000401, 0x2, 0);
    let marker = ObjectStore::new(dir.path().join("fids"))
        .ensure_marker(&earlier)
        .expect("marker");
    let shard = dir.path().join("secondary/1000-1010/0002");
    fs::create_dir_all(&shard).expect("shard");
    fs::hard_link(&marker, shard.join(earlier.to_string())).expect("link");

    let report = advancer.advance(1015).expect("advance");
    assert_eq!(report.merged, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.to_secondary, vec![Window::new(1000, 1010)]);
    assert!(!dir.path().join("active/1000-1010").exists());

    let links = tier_links(dir.path());
    assert_eq!(links[&touched.to_string()], vec!["secondary/1000-1010".to_string()]);
    assert_eq!(links[&earlier.to_string()], vec!["secondary/1000-1010".to_string()]);
    let touched_marker = dir.path().join("fids/0001").join(touched.to_string());
    assert_eq!(link_count(&touched_marker).expect("nlink"), 2);
}

#[test]
fn unusable_target_keeps_window_in_place() {
    let dir = tempdir().expect("tempdir");
    let (advancer, consumer) = setup(dir.path(), 10);
    advancer.advance(1005).expect("advance");
    let fid = Fid::new(0x200000401, 0x3, 0);
    consumer.touch(&fid).expect("touch");
    fs::write(dir.path().join("secondary/1000-1010"), b"").expect("file target");

    let report = advancer.advance(1015).expect("advance");
    // Once as a non-directory entry of secondary, once as the move target.
    assert_eq!(report.skipped, 2);
    assert_eq!(report.merged, 0);
    assert!(report.to_secondary.is_empty());
    assert!(dir
        .path()
        .join("active/1000-1010/0003")
        .join(fid.to_string())
        .is_file());
    assert!(dir.path().join("active/1010-1020").is_dir());
}

#[test]
fn secondary_window_newer_than_new_start_is_left_alone() {
    let dir = tempdir().expect("tempdir");
    let (advancer, _consumer) = setup(dir.path(), 10);
    fs::create_dir_all(dir.path().join("secondary/2000-2010")).expect("future window");

    let report = advancer.advance(1005).expect("advance");
    assert_eq!(report.opened, Some(Window::new(1000, 1010)));
    assert!(report.to_secondary.is_empty());
    assert!(report.to_inactive.is_empty());
    assert_eq!(report.skipped, 0);
    assert!(dir.path().join("secondary/2000-2010").is_dir());
}
