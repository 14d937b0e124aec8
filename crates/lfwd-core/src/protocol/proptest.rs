//! Property-based tests for protocol message serialization.
//!
//! Every `Message` variant must survive a serde round trip through a
//! compact binary format unchanged.

#![cfg(test)]

use proptest::prelude::*;

use crate::protocol::{
    ChannelAcceptPayload, ChannelCloseReason, ChannelClosePayload, ChannelDataPayload,
    ChannelEofPayload, ChannelId, ChannelOpenPayload, ChannelParams, ChannelRejectCode,
    ChannelRejectPayload, DirectTcpIpParams, DisconnectPayload, DisconnectReason, Message,
    WindowAdjustPayload,
};

// =============================================================================
// Arbitrary Generators
// =============================================================================

prop_compose! {
    fn arb_channel_id()(
        id in any::<u64>(),
        is_client in any::<bool>(),
    ) -> ChannelId {
        if is_client {
            ChannelId::client(id)
        } else {
            ChannelId::server(id)
        }
    }
}

prop_compose! {
    fn arb_direct_tcpip()(
        target_host in "[a-z0-9.-]{1,32}",
        target_port in any::<u16>(),
        originator_host in "[0-9.:]{1,39}",
        originator_port in any::<u16>(),
    ) -> DirectTcpIpParams {
        DirectTcpIpParams {
            target_host,
            target_port,
            originator_host,
            originator_port,
        }
    }
}

prop_compose! {
    fn arb_open()(
        channel_id in arb_channel_id(),
        params in arb_direct_tcpip(),
        initial_window in any::<u32>(),
        max_packet_size in any::<u32>(),
    ) -> ChannelOpenPayload {
        ChannelOpenPayload {
            channel_id,
            params: ChannelParams::DirectTcpIp(params),
            initial_window,
            max_packet_size,
        }
    }
}

prop_compose! {
    fn arb_accept()(
        channel_id in arb_channel_id(),
        initial_window in any::<u32>(),
        max_packet_size in any::<u32>(),
    ) -> ChannelAcceptPayload {
        ChannelAcceptPayload {
            channel_id,
            initial_window,
            max_packet_size,
        }
    }
}

fn arb_reject_code() -> impl Strategy<Value = ChannelRejectCode> {
    prop_oneof![
        Just(ChannelRejectCode::AdministrativelyProhibited),
        Just(ChannelRejectCode::ConnectFailed),
        Just(ChannelRejectCode::UnknownChannelType),
        Just(ChannelRejectCode::ResourceShortage),
    ]
}

prop_compose! {
    fn arb_reject()(
        channel_id in arb_channel_id(),
        code in arb_reject_code(),
        message in ".{0,64}",
    ) -> ChannelRejectPayload {
        ChannelRejectPayload {
            channel_id,
            code,
            message,
        }
    }
}

fn arb_close_reason() -> impl Strategy<Value = ChannelCloseReason> {
    prop_oneof![
        Just(ChannelCloseReason::Normal),
        Just(ChannelCloseReason::ConnectionClosed),
        ".{0,64}".prop_map(|message| ChannelCloseReason::Error { message }),
    ]
}

fn arb_disconnect_reason() -> impl Strategy<Value = DisconnectReason> {
    prop_oneof![
        Just(DisconnectReason::ByApplication),
        Just(DisconnectReason::ProtocolError),
    ]
}

prop_compose! {
    fn arb_data()(
        channel_id in arb_channel_id(),
        data in prop::collection::vec(any::<u8>(), 0..4096),
    ) -> ChannelDataPayload {
        ChannelDataPayload { channel_id, data }
    }
}

/// Generate an arbitrary Message covering every variant.
fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        // Session-level
        (arb_disconnect_reason(), any::<Option<String>>())
            .prop_map(|(reason, message)| Message::Disconnect(DisconnectPayload {
                reason,
                message,
            })),
        // Channel lifecycle
        arb_open().prop_map(Message::ChannelOpen),
        arb_accept().prop_map(Message::ChannelAccept),
        arb_reject().prop_map(Message::ChannelReject),
        arb_channel_id().prop_map(|channel_id| Message::ChannelEof(ChannelEofPayload {
            channel_id
        })),
        (arb_channel_id(), arb_close_reason()).prop_map(|(channel_id, reason)| {
            Message::ChannelClose(ChannelClosePayload { channel_id, reason })
        }),
        // Data and flow control
        arb_data().prop_map(Message::ChannelData),
        (arb_channel_id(), any::<u32>()).prop_map(|(channel_id, bytes_to_add)| {
            Message::WindowAdjust(WindowAdjustPayload {
                channel_id,
                bytes_to_add,
            })
        }),
    ]
}

fn roundtrip(msg: &Message) -> Message {
    let encoded = bincode::serialize(msg).unwrap();
    bincode::deserialize(&encoded).unwrap()
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn roundtrip_arbitrary_message(msg in arb_message()) {
        let decoded = roundtrip(&msg);
        prop_assert_eq!(decoded.kind(), msg.kind());
        prop_assert_eq!(decoded.channel_id(), msg.channel_id());
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        // May fail, must not panic.
        let _ = bincode::deserialize::<Message>(&data);
    }

    #[test]
    fn truncated_encoding_is_rejected(msg in arb_message(), cut in 1usize..8) {
        let encoded = bincode::serialize(&msg).unwrap();
        let keep = encoded.len().saturating_sub(cut);
        prop_assert!(bincode::deserialize::<Message>(&encoded[..keep]).is_err());
    }
}

#[test]
fn every_kind_roundtrips() {
    let id = ChannelId::server(7);
    let messages = vec![
        Message::Disconnect(DisconnectPayload {
            reason: DisconnectReason::ProtocolError,
            message: Some("bad frame".into()),
        }),
        Message::ChannelOpen(ChannelOpenPayload {
            channel_id: ChannelId::client(0),
            params: ChannelParams::DirectTcpIp(DirectTcpIpParams {
                target_host: "db.internal".into(),
                target_port: 5432,
                originator_host: "127.0.0.1".into(),
                originator_port: 50000,
            }),
            initial_window: 2 * 1024 * 1024,
            max_packet_size: 32 * 1024,
        }),
        Message::ChannelAccept(ChannelAcceptPayload {
            channel_id: id,
            initial_window: 1024,
            max_packet_size: 512,
        }),
        Message::ChannelReject(ChannelRejectPayload {
            channel_id: id,
            code: ChannelRejectCode::ConnectFailed,
            message: "connection refused".into(),
        }),
        Message::ChannelEof(ChannelEofPayload { channel_id: id }),
        Message::ChannelClose(ChannelClosePayload {
            channel_id: id,
            reason: ChannelCloseReason::Error {
                message: "reset".into(),
            },
        }),
        Message::ChannelData(ChannelDataPayload {
            channel_id: id,
            data: b"payload".to_vec(),
        }),
        Message::WindowAdjust(WindowAdjustPayload {
            channel_id: id,
            bytes_to_add: 4096,
        }),
    ];

    let mut kinds: Vec<&str> = messages.iter().map(Message::kind).collect();
    kinds.sort_unstable();
    kinds.dedup();
    assert_eq!(kinds.len(), messages.len());

    for msg in &messages {
        assert_eq!(&roundtrip(msg), msg);
    }
}
