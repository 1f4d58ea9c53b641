//! Fixtures shared by the server integration tests

#![allow(dead_code)]

use std::sync::Arc;

use git2::{Oid, Repository, Signature};
use gitrow_server::{Backend, BroadcastSink, NotificationSink};
use libgitrow_core::config::ServerConfig;
use libgitrow_core::PushUpdate;
use libgitrow_git::toolchain::build_push_pack;
use tempfile::TempDir;

pub struct Fixture {
    pub work: TempDir,
    pub data: TempDir,
    pub repo: Repository,
}

impl Fixture {
    pub fn new() -> Self {
        let work = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let repo = Repository::init(work.path()).unwrap();
        Self { work, data, repo }
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            data_dir: self.data.path().to_path_buf(),
            ..ServerConfig::default()
        }
    }

    pub fn backend(&self) -> Arc<Backend> {
        Arc::new(Backend::open(self.config()).unwrap())
    }

    pub fn backend_with(&self, config: ServerConfig) -> (Arc<Backend>, Arc<BroadcastSink>) {
        let sink = Arc::new(BroadcastSink::new(64));
        let backend = Backend::open_with_sink(config, sink.clone() as Arc<dyn NotificationSink>).unwrap();
        (Arc::new(backend), sink)
    }

    pub fn commit(&self, file: &str, content: &str, parents: &[Oid]) -> Oid {
        commit_in(&self.repo, file, content, parents)
    }

    /// Pack of everything reachable from `tips` that `have` does not reach
    pub fn pack(&self, tips: &[Oid], have: &[Oid]) -> Vec<u8> {
        let have: Vec<String> = have.iter().map(|o| o.to_string()).collect();
        build_push_pack(&self.repo, tips, &have).unwrap()
    }
}

pub fn commit_in(repo: &Repository, file: &str, content: &str, parents: &[Oid]) -> Oid {
    let blob = repo.blob(content.as_bytes()).unwrap();
    let mut tb = repo.treebuilder(None).unwrap();
    tb.insert(file, blob, 0o100644).unwrap();
    let tree = repo.find_tree(tb.write().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parents: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<_> = parents.iter().collect();
    repo.commit(None, &sig, &sig, content, &tree, &parent_refs).unwrap()
}

pub fn update(oid: Oid, dst: &str, force: bool) -> PushUpdate {
    PushUpdate::new(oid.to_string(), dst, force)
}
