// Segments shared with a separate process
//
// The parent test re-runs this test binary, selecting only the ignored child
// test, which attaches to the parent's segment by name.
use std::env;
use std::process::Command;

use shmseg_core::{generate_id, SharedSegment};

const CHILD_ENV: &str = "SHMSEG_CROSS_PROCESS_NAME";
const SIZE: usize = 1024;

#[test]
fn test_cross_process_round_trip() {
    let name = generate_id(false).name().to_string();
    let mut host = SharedSegment::create(&name, SIZE).unwrap();
    host.write("from parent").unwrap();

    let status = Command::new(env::current_exe().unwrap())
        .args(["cross_process_child", "--exact", "--ignored", "--test-threads=1"])
        .env(CHILD_ENV, &name)
        .status()
        .unwrap();
    assert!(status.success(), "child process failed: {}", status);

    assert_eq!(host.read().unwrap(), "from child");
    let bytes = host.read_buffer().unwrap();
    assert_eq!(bytes.len(), SIZE);
    assert_eq!(bytes[SIZE - 1], 0xEE);
}

#[test]
#[ignore = "spawned by test_cross_process_round_trip"]
fn cross_process_child() {
    let Ok(name) = env::var(CHILD_ENV) else {
        return;
    };

    let mut client = SharedSegment::open(&name, SIZE).unwrap();
    assert!(!client.is_host());
    assert_eq!(client.read().unwrap(), "from parent");

    let mut reply = vec![0u8; SIZE];
    reply[..10].copy_from_slice(b"from child");
    reply[SIZE - 1] = 0xEE;
    client.write_buffer(&reply).unwrap();
}
