//! End-to-end scenarios exercising a door across the real client/server
//! wire protocol, one process, one `AF_UNIX`/`SOCK_SEQPACKET` socket per
//! door. `#[serial]` because every test shares the same process-wide
//! runtime singleton (door table, id generator, fork hooks).

use doors::attrs::Attributes;
use doors::client::{Client, RemoteParam};
use doors::server::{Door, Param, Request, Response};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn door_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

/// Give a freshly attached door's accept loop a moment to actually reach
/// `accept()` before a client tries to connect.
fn settle() {
    thread::sleep(Duration::from_millis(20));
}

#[test]
#[serial]
fn hello_world_echo_and_zero_byte_payload() {
    fn echo(_cookie: u64, req: Request<'_>) -> Response<Vec<u8>> {
        Response::new(req.data.to_vec())
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "echo.door");
    let door = Door::create(echo).unwrap();
    door.attach(&path).unwrap();
    settle();

    let client = Client::open(&path).unwrap();
    assert_eq!(client.call(b"hello, world").unwrap(), b"hello, world");
    assert_eq!(client.call(&[]).unwrap(), Vec::<u8>::new());
}

#[test]
#[serial]
fn concurrent_calls_run_on_distinct_worker_threads() {
    fn sleepy(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        thread::sleep(Duration::from_millis(300));
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "sleepy.door");
    let door = Door::create(sleepy).unwrap();
    door.attach(&path).unwrap();
    settle();

    let start = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let client = Client::open(&path).unwrap();
                client.call(&[]).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();

    // Three serialized 300ms calls would take ~900ms; concurrent workers
    // should finish well under that, close to a single 300ms call.
    assert!(
        elapsed < Duration::from_millis(700),
        "calls did not appear to run concurrently: took {elapsed:?}"
    );
}

#[test]
#[serial]
fn params_round_trip_and_size_rcvbuf() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "params.door");
    let door = Door::create(noop).unwrap();

    assert_eq!(door.getparam(Param::DescMax), 0);
    assert!(door.setparam(Param::DescMax, 1).is_err());
    door.setparam(Param::DescMax, 0).unwrap();

    door.setparam(Param::DataMax, 4096).unwrap();
    assert_eq!(door.getparam(Param::DataMax), 4096);
    door.setparam(Param::DataMin, 16).unwrap();
    assert_eq!(door.getparam(Param::DataMin), 16);

    // DataMax below the current DataMin is rejected, and vice versa.
    assert!(door.setparam(Param::DataMax, 4).is_err());
    assert!(door.setparam(Param::DataMin, 8192).is_err());

    door.attach(&path).unwrap();
    settle();

    let client = Client::open(&path).unwrap();
    assert_eq!(client.getparam(RemoteParam::DataMax).unwrap(), 4096);
    assert_eq!(client.getparam(RemoteParam::DataMin).unwrap(), 16);
    assert_eq!(client.getparam(RemoteParam::DescMax).unwrap(), 0);

    // A payload below data_min is rejected without ever reaching `noop`.
    let err = client.call(&[0u8; 4]).unwrap_err();
    let _ = err;
}

#[test]
#[serial]
fn info_round_trips_and_revoked_door_refuses_calls() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let mut doors = Vec::new();
    for i in 0..3 {
        let path = door_path(&dir, &format!("info-{i}.door"));
        let door = Door::create_with_cookie(noop, i as u64).unwrap();
        door.attach(&path).unwrap();
        doors.push((door, path));
    }
    settle();

    for (door, path) in &doors {
        let client = Client::open(path).unwrap();
        let info = client.info().unwrap();
        assert_eq!(info.id, door.id());
        assert_eq!(info.cookie, door.info().cookie);
    }

    let (revoked_door, revoked_path) = doors.pop().unwrap();
    let client = Client::open(&revoked_path).unwrap();
    revoked_door.revoke().unwrap();

    // Existing connections may still be live briefly, but no further call
    // should succeed once the door is gone; either the call errors outright
    // or the connection is simply no longer answered.
    let _ = client.call(&[]);
    drop(revoked_door);
}

#[test]
#[serial]
fn unref_multi_fires_on_every_idle_transition() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let fires = Arc::new(AtomicUsize::new(0));
    let fires_proc = fires.clone();
    let procedure = move |cookie: u64, req: Request<'_>| {
        if req.data.is_empty() {
            fires_proc.fetch_add(1, Ordering::SeqCst);
        }
        noop(cookie, req)
    };

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "unref-multi.door");
    let door = Door::create_with_attributes(procedure, Attributes::UNREF_MULTI).unwrap();
    door.attach(&path).unwrap();
    settle();

    for _ in 0..2 {
        let client = Client::open(&path).unwrap();
        client.call(&[1]).unwrap();
        drop(client);
        // Give the dispatcher's release() time to observe refcount == 1
        // and spawn the synthetic unreferenced-invocation worker.
        thread::sleep(Duration::from_millis(100));
    }

    assert!(
        fires.load(Ordering::SeqCst) >= 2,
        "expected at least two unreferenced invocations under UNREF_MULTI, saw {}",
        fires.load(Ordering::SeqCst)
    );
}

#[test]
#[serial]
fn plain_unref_fires_at_most_once() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let fires = Arc::new(AtomicUsize::new(0));
    let fires_proc = fires.clone();
    let procedure = move |cookie: u64, req: Request<'_>| {
        if req.data.is_empty() {
            fires_proc.fetch_add(1, Ordering::SeqCst);
        }
        noop(cookie, req)
    };

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "unref.door");
    let door = Door::create_with_attributes(procedure, Attributes::UNREF).unwrap();
    door.attach(&path).unwrap();
    settle();

    for _ in 0..3 {
        let client = Client::open(&path).unwrap();
        client.call(&[1]).unwrap();
        drop(client);
        thread::sleep(Duration::from_millis(100));
    }

    assert_eq!(
        fires.load(Ordering::SeqCst),
        1,
        "plain UNREF should fire exactly once over the door's lifetime"
    );
}

#[test]
#[serial]
fn revoke_before_attach_stops_the_accept_loop() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let door = Door::create(noop).unwrap();
    door.revoke().unwrap();
    // The accept loop, still waiting for attach-or-revoke, must notice the
    // revoke and exit rather than hang forever; dropping here must not
    // block or panic via the refcount invariant in `DoorState::drop`.
    drop(door);
}

#[test]
#[serial]
fn revoke_after_attach_unblocks_the_accept_loop() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "revoke.door");
    let door = Door::create(noop).unwrap();
    door.attach(&path).unwrap();
    settle();

    let client = Client::open(&path).unwrap();
    assert!(client.call(&[]).is_ok());

    door.revoke().unwrap();
    // A fresh connection attempt should now fail -- the node is gone and
    // the listening socket has been force-closed.
    settle();
    assert!(Client::open(&path).is_err());
}

#[test]
#[serial]
fn detach_then_reattach_same_door_is_rejected() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "detach.door");
    let door = Door::create(noop).unwrap();
    door.attach(&path).unwrap();
    door.detach().unwrap();
    // A door is a single-shot listener; detaching unlinks the path, it does
    // not free the door up to be attached again.
    assert!(door.attach(&path).is_err());
}

#[test]
#[serial]
fn force_attach_replaces_a_stale_node() {
    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "force.door");

    let first = Door::create(noop).unwrap();
    first.attach(&path).unwrap();
    // Leave the node behind without a live accept loop to answer it.
    first.revoke().unwrap();

    let second = Door::create(noop).unwrap();
    second.force_attach(&path).unwrap();
    settle();

    let client = Client::open(&path).unwrap();
    assert!(client.call(&[]).is_ok());
}

#[test]
#[serial]
fn cookie_is_visible_to_the_server_procedure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_proc = seen.clone();
    let procedure = move |cookie: u64, _req: Request<'_>| {
        seen_proc.lock().unwrap().push(cookie);
        Response::<Vec<u8>>::empty()
    };

    let dir = tempfile::tempdir().unwrap();
    let path = door_path(&dir, "cookie.door");
    let door = Door::create_with_cookie(procedure, 42).unwrap();
    door.attach(&path).unwrap();
    settle();

    let client = Client::open(&path).unwrap();
    client.call(&[]).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![42]);
}
