// End-to-end checks of the mock client wired through the remote model:
// connection validation, listing with the shared comparator, and partial
// enumeration over the predefined tree.
use std::sync::{Arc, Mutex};

use portside::client::{SftpClient, SharedClient};
use portside::mock::MockClient;
use portside::remote::enumeration::EnumOptions;
use portside::remote::RemoteModel;
use portside::types::{KnownHostsPolicy, SessionOptions};

fn valid_options() -> SessionOptions {
    SessionOptions::new("example.test", "alice")
}

fn connected_mock() -> SharedClient {
    let mut c = MockClient::new();
    c.connect(&valid_options()).expect("mock connect");
    Arc::new(Mutex::new(c))
}

#[test]
fn session_option_defaults() {
    let opt = SessionOptions::default();
    assert_eq!(opt.port, 22);
    assert_eq!(opt.known_hosts_policy, KnownHostsPolicy::Strict);
    assert!(opt.password.is_none());
    assert!(opt.private_key_path.is_none());
}

#[test]
fn connect_validation_through_trait_object() {
    let client: SharedClient = Arc::new(Mutex::new(MockClient::new()));
    let mut guard = client.lock().unwrap();

    let bad = SessionOptions::new("", "u");
    assert!(guard.connect(&bad).is_err());
    assert!(!guard.is_connected());

    assert!(guard.connect(&valid_options()).is_ok());
    assert!(guard.is_connected());
}

#[test]
fn model_lists_home_sorted_directories_first() {
    let mut model = RemoteModel::new();
    model.set_client(Some(connected_mock()));
    model.load("/home").expect("listing /home");

    let names: Vec<&str> = model.items().iter().map(|i| i.info.name.as_str()).collect();
    assert_eq!(names, vec!["guest", "luis", "notes.md"]);
    assert!(model.items()[0].info.is_dir);
    assert!(model.items()[1].info.is_dir);
    assert!(!model.items()[2].info.is_dir);
}

#[test]
fn empty_path_lists_root() {
    let mut model = RemoteModel::new();
    model.set_client(Some(connected_mock()));

    model.load("").expect("listing ''");
    let from_empty: Vec<String> =
        model.items().iter().map(|i| i.info.name.clone()).collect();
    assert_eq!(model.current_path(), "/");

    model.load("/").expect("listing /");
    let from_root: Vec<String> = model.items().iter().map(|i| i.info.name.clone()).collect();
    assert_eq!(from_empty, from_root);
}

#[test]
fn unknown_path_fails_with_message() {
    let mut model = RemoteModel::new();
    model.set_client(Some(connected_mock()));
    let err = model.load("/does-not-exist").expect_err("missing path must fail");
    assert!(!err.to_string().is_empty());
}

#[test]
fn enumeration_over_mock_reports_partial_subtrees() {
    // The mock tree has listings only for a few directories; the others
    // surface as denied subtrees without aborting the walk.
    let mut model = RemoteModel::new();
    model.set_client(Some(connected_mock()));

    let (files, stats) = model
        .enumerate_files_under("/home", &EnumOptions::default())
        .expect("enumeration runs");

    let mut rels: Vec<&str> = files.iter().map(|e| e.rel_path.as_str()).collect();
    rels.sort();
    assert_eq!(rels, vec!["luis/foto.jpg", "notes.md"]);
    assert!(stats.partial_error);
    assert_eq!(stats.denied_dirs, 2); // guest and luis/proyectos have no listing
    assert_eq!(stats.dirs_visited, 4);
}
