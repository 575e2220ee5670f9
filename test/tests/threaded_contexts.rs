/// The transport and processing contexts on separate threads.
use std::{thread, time::Duration};

use cmdchan_shared::{Message, MessageKind, Reply};
use cmdchan_test::{init_logging, TestServer};

const MAX_PUMPS: usize = 5_000;

fn pump_until(server: &mut TestServer, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..MAX_PUMPS {
        if done() {
            return true;
        }
        server.pump();
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn sync_point_reply_does_not_wait_for_processing() {
    init_logging();
    let mut server = TestServer::new();
    let client = server.connect(1);
    let channel_id = client.channel_id();
    server.create_stub(&client, 5);
    let (mut endpoint, replies, stubs) = client.into_parts();

    let (inbound, inbound_receiver) = smol::channel::unbounded();
    let transport = thread::spawn(move || {
        endpoint.run(inbound_receiver);
        endpoint
    });

    inbound
        .send_blocking(Message::new(5, MessageKind::InsertSyncPoint).expecting_reply(1))
        .unwrap();

    // the processing context has not been pumped at all
    let sync_point = match replies.receive_blocking() {
        Some(Reply::SyncPointInserted {
            route_id: 5,
            request_id: Some(1),
            sync_point,
        }) => sync_point,
        other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(server.channel(channel_id).messages_processed(), 0);

    let sync_points = server.sync_points().clone();
    assert!(pump_until(&mut server, || sync_points
        .is_sync_point_retired(sync_point)));
    let stub = stubs.get(5).unwrap();
    assert!(stub.sync_points().is_empty());
    assert_eq!(stub.sync_points_reached(), 1);

    drop(inbound);
    let endpoint = transport.join().unwrap();
    assert_eq!(endpoint.channel_id(), channel_id);

    // the transport reported its shutdown as a channel error
    server.pump();
    assert_eq!(server.manager.channel_count(), 0);
}

#[test]
fn commands_from_transport_thread_arrive_in_order() {
    let mut server = TestServer::new();
    let client = server.connect(1);
    server.create_stub(&client, 5);
    server.create_stub(&client, 6);
    let (mut endpoint, _replies, stubs) = client.into_parts();

    let (inbound, inbound_receiver) = smol::channel::unbounded();
    let transport = thread::spawn(move || endpoint.run(inbound_receiver));

    let mut expected = Vec::new();
    for index in 0u8..40 {
        let route_id = if index % 3 == 0 { 6 } else { 5 };
        inbound
            .send_blocking(Message::command(route_id, &[index]))
            .unwrap();
        if route_id == 5 {
            expected.push(vec![index]);
        }
    }

    let log = stubs.dispatch_log().clone();
    assert!(pump_until(&mut server, || log.len() == 40));
    assert_eq!(log.payloads(5), expected);

    drop(inbound);
    transport.join().unwrap();
    server.pump();
    assert_eq!(server.manager.channel_count(), 0);
}
