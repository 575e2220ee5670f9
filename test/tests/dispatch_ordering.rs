/// Dispatch order, rescheduling and routing failures on a single channel.
use cmdchan_server::ChannelConfig;
use cmdchan_shared::{Message, MessageKind, Reply};
use cmdchan_test::{init_logging, TestServer, UNKNOWN_COMMAND};
use proptest::prelude::*;

fn payloads(items: &[&[u8]]) -> Vec<Vec<u8>> {
    items.iter().map(|item| item.to_vec()).collect()
}

#[test]
fn blocking_wait_is_dispatched_before_queued_commands() {
    init_logging();
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(5, b"m1");
    client.send_command(5, b"m2");
    client.send_command(5, b"m3");
    client
        .send(Message::new(5, MessageKind::WaitForToken).with_payload(b"wait"))
        .unwrap();

    server.settle_one(&mut client);

    assert_eq!(
        client.dispatch_log().payloads(5),
        payloads(&[b"wait", b"m1", b"m2", b"m3"])
    );
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 4);
    assert_eq!(client.endpoint.filter().messages_forwarded_to_channel(), 4);
}

#[test]
fn later_blocking_waits_overtake_earlier_ones() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(5, b"m1");
    client
        .send(Message::new(5, MessageKind::WaitForToken).with_payload(b"token"))
        .unwrap();
    client
        .send(Message::new(5, MessageKind::WaitForGetOffset).with_payload(b"offset"))
        .unwrap();

    server.settle_one(&mut client);

    assert_eq!(
        client.dispatch_log().payloads(5),
        payloads(&[b"offset", b"token", b"m1"])
    );
}

#[test]
fn sync_command_gets_a_stub_reply() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    let request_id = client.send_sync(Message::command(5, b"draw")).unwrap();
    server.settle_one(&mut client);

    assert_eq!(
        client.take_replies(),
        vec![Reply::Stub {
            route_id: 5,
            request_id: Some(request_id),
            payload: b"Command".to_vec().into_boxed_slice(),
        }]
    );
}

#[test]
fn sync_message_to_unknown_route_gets_error_reply() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);

    let request_id = client.send_sync(Message::command(9, b"lost")).unwrap();
    server.settle_one(&mut client);

    assert_eq!(
        client.take_replies(),
        vec![Reply::Error {
            route_id: 9,
            request_id,
        }]
    );
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 1);
}

#[test]
fn async_message_to_unknown_route_is_dropped() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(9, b"lost");
    client.send_command(5, b"kept");
    server.settle_one(&mut client);

    assert!(client.take_replies().is_empty());
    assert_eq!(client.dispatch_log().payloads(5), payloads(&[b"kept"]));
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 2);
    assert_eq!(server.channel(client.channel_id()).deferred_len(), 0);
}

#[test]
fn unhandled_sync_command_gets_error_reply() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    let request_id = client
        .send_sync(Message::command(5, UNKNOWN_COMMAND))
        .unwrap();
    server.settle_one(&mut client);

    assert_eq!(
        client.take_replies(),
        vec![Reply::Error {
            route_id: 5,
            request_id,
        }]
    );
}

#[test]
fn descheduled_stub_pauses_dispatch_until_rescheduled() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);
    let stub = client.stub(5);

    stub.set_scheduled(false);
    client.send_command(5, b"m1");
    client.send_command(5, b"m2");
    server.settle_one(&mut client);

    let channel = server.channel(client.channel_id());
    assert!(client.dispatch_log().is_empty());
    assert_eq!(channel.deferred_len(), 2);
    assert_eq!(channel.num_stubs_descheduled(), 1);
    assert!(!channel.is_handle_messages_scheduled());

    stub.set_scheduled(true);
    server.settle_one(&mut client);

    assert_eq!(client.dispatch_log().payloads(5), payloads(&[b"m1", b"m2"]));
    assert_eq!(server.channel(client.channel_id()).num_stubs_descheduled(), 0);
}

#[test]
fn dispatch_notices_a_stub_that_descheduled_itself() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);
    let stub = client.stub(5);

    stub.set_scheduled_silently(false);
    client.send_command(5, b"m1");
    server.settle_one(&mut client);

    assert!(client.dispatch_log().is_empty());
    assert_eq!(server.channel(client.channel_id()).num_stubs_descheduled(), 1);

    stub.set_scheduled(true);
    server.settle_one(&mut client);

    assert_eq!(client.dispatch_log().payloads(5), payloads(&[b"m1"]));
}

#[test]
fn duplicate_scheduling_notifications_are_counted_once() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);
    server.create_stub(&client, 6);

    client.stub(5).set_scheduled(false);
    client.stub(5).set_scheduled(false);
    client.stub(6).set_scheduled(false);
    server.settle_one(&mut client);
    assert_eq!(server.channel(client.channel_id()).num_stubs_descheduled(), 2);

    client.stub(5).set_scheduled(true);
    client.stub(5).set_scheduled(true);
    server.settle_one(&mut client);
    assert_eq!(server.channel(client.channel_id()).num_stubs_descheduled(), 1);
}

#[test]
fn unprocessed_commands_turn_into_rescheduled_messages() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);
    client.stub(5).set_unprocessed_chunks(2);

    client.send_command(5, b"m1");
    client.send_command(5, b"m2");
    server.settle_one(&mut client);

    assert_eq!(
        client.dispatch_log().kinds(),
        vec!["Command", "Rescheduled", "Rescheduled", "Command"]
    );
    // the rescheduled passes complete m1 rather than count on their own
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 2);
}

#[test]
fn preempted_stub_yields_until_flag_clears() {
    let mut server = TestServer::new();
    let mut preempting = server.connect(1);
    let mut preempted = server.connect(2);
    server.create_stub(&preempted, 5);
    server
        .manager
        .set_preemption(preempting.channel_id(), preempted.channel_id())
        .unwrap();

    let flag = preempted.stub(5).preempt_by_flag().unwrap();
    flag.set();

    preempted.send_command(5, b"m1");
    for _ in 0..4 {
        server.pump();
    }

    let channel = server.channel(preempted.channel_id());
    assert!(preempted.dispatch_log().is_empty());
    assert_eq!(channel.deferred_len(), 1);
    // still polling for the flag to clear
    assert!(channel.is_handle_messages_scheduled());

    flag.reset();
    server.settle(&mut [&mut preempting, &mut preempted]);

    assert_eq!(preempted.dispatch_log().payloads(5), payloads(&[b"m1"]));
}

#[test]
fn control_messages_create_and_destroy_stubs() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);

    let created = client.request_create_stub(7);
    let conflict = client.request_create_stub(7);
    let destroyed = client
        .send_sync(Message::control(MessageKind::DestroyStub { route_id: 7 }))
        .unwrap();
    server.settle_one(&mut client);

    assert_eq!(
        client.take_replies(),
        vec![
            Reply::StubCreated {
                route_id: 7,
                request_id: created,
                succeeded: true,
            },
            Reply::StubCreated {
                route_id: 7,
                request_id: conflict,
                succeeded: false,
            },
            Reply::StubDestroyed {
                route_id: 7,
                request_id: destroyed,
            },
        ]
    );
    assert_eq!(server.channel(client.channel_id()).stub_count(), 0);
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 3);
}

#[test]
fn stub_created_by_control_message_receives_later_commands() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);

    client.request_create_stub(3);
    client.send_command(3, b"first");
    server.settle_one(&mut client);

    assert_eq!(client.dispatch_log().payloads(3), payloads(&[b"first"]));
}

#[test]
fn acknowledgments_are_fast_tracked_within_one_pass() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(5, b"m1");
    for _ in 0..3 {
        client.send(Message::new(5, MessageKind::Ack)).unwrap();
    }

    // first pump queues the messages, second runs one dispatch pass
    server.pump();
    server.pump();

    assert_eq!(client.dispatch_log().kinds(), vec!["Command", "Ack", "Ack", "Ack"]);
}

#[test]
fn acknowledgments_for_another_route_wait_for_the_next_pass() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);
    server.create_stub(&client, 6);

    client.send_command(5, b"m1");
    client.send(Message::new(6, MessageKind::Ack)).unwrap();

    server.pump();
    server.pump();
    assert_eq!(client.dispatch_log().kinds(), vec!["Command"]);

    server.settle_one(&mut client);
    assert_eq!(client.dispatch_log().kinds(), vec!["Command", "Ack"]);
    assert_eq!(client.dispatch_log().entries()[1].0, 6);
}

#[test]
fn fast_track_run_is_bounded() {
    let mut server = TestServer::with_channel_config(ChannelConfig {
        max_fast_track_run: 2,
        ..ChannelConfig::default()
    });
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(5, b"m1");
    for _ in 0..3 {
        client.send(Message::new(5, MessageKind::Ack)).unwrap();
    }

    server.pump();
    server.pump();
    assert_eq!(client.dispatch_log().len(), 3);

    server.settle_one(&mut client);
    assert_eq!(client.dispatch_log().len(), 4);
}

#[test]
fn disabled_fast_track_dispatches_one_message_per_pass() {
    let mut server = TestServer::with_channel_config(ChannelConfig {
        fast_track_acks: false,
        log_messages: true,
        ..ChannelConfig::default()
    });
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send_command(5, b"m1");
    client.send(Message::new(5, MessageKind::Ack)).unwrap();

    server.pump();
    server.pump();
    assert_eq!(client.dispatch_log().len(), 1);

    server.settle_one(&mut client);
    assert_eq!(client.dispatch_log().kinds(), vec!["Command", "Ack"]);
}

#[test]
fn clients_cannot_send_service_internal_messages() {
    let mut server = TestServer::new();
    let mut client = server.connect(1);
    server.create_stub(&client, 5);

    client.send(Message::rescheduled(5)).unwrap();
    client.send(Message::retire_sync_point(5, 1)).unwrap();
    server.settle_one(&mut client);

    assert!(client.dispatch_log().is_empty());
    assert_eq!(client.endpoint.filter().messages_forwarded_to_channel(), 0);
    assert_eq!(server.channel(client.channel_id()).messages_processed(), 0);
}

proptest! {
    #[test]
    fn each_route_sees_its_messages_in_arrival_order(
        sends in prop::collection::vec((1i32..4, any::<bool>(), any::<u8>()), 1..64)
    ) {
        let mut server = TestServer::new();
        let mut client = server.connect(1);
        for route_id in 1..4 {
            server.create_stub(&client, route_id);
        }

        let mut expected = vec![Vec::new(); 4];
        for (index, (route_id, is_ack, byte)) in sends.iter().enumerate() {
            let payload = [*byte, index as u8];
            let kind = if *is_ack { MessageKind::Ack } else { MessageKind::Command };
            client
                .send(Message::new(*route_id, kind).with_payload(&payload))
                .unwrap();
            expected[*route_id as usize].push(payload.to_vec());
        }
        server.settle_one(&mut client);

        for route_id in 1..4 {
            prop_assert_eq!(
                client.dispatch_log().payloads(route_id),
                expected[route_id as usize].clone()
            );
        }
        prop_assert_eq!(
            server.channel(client.channel_id()).messages_processed(),
            sends.len() as u64
        );
    }
}
