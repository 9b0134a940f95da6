//! Multi-channel example: one connection, a content channel and a method
//! channel, and what each session sees when the broker goes away.
//!
//! Run with:
//!   cargo run --example multi-channel

use std::sync::Arc;

use amqpwire::frame::{encode_frame, Frame, FrameReader};
use amqpwire::session::{
    ChannelKind, Command, Connection, ConnectionConfig, MethodIdClassifier, Session,
};
use amqpwire::transport::{Endpoint, FamilyPreference, TransportConfig};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const BASIC_DELIVER: &[u8] = b"\x00\x3c\x00\x3c";
const BASIC_PUBLISH: &[u8] = b"\x00\x3c\x00\x28";
const BASIC_QOS_OK: &[u8] = b"\x00\x3c\x00\x0b";

fn content_header(body_size: u64) -> Vec<u8> {
    let mut payload = Vec::from(&b"\x00\x3c\x00\x00"[..]);
    payload.extend_from_slice(&body_size.to_be_bytes());
    payload.extend_from_slice(&[0, 0]);
    payload
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        let mut header = [0u8; 8];
        socket.read_exact(&mut header).await?;
        eprintln!("[broker] protocol header {:?}", &header[..]);

        let delivery = Command::content(1, BASIC_DELIVER, content_header(11), &b"hello there"[..], 16);
        let mut out = BytesMut::new();
        for frame in delivery.frames() {
            encode_frame(frame, &mut out)?;
        }
        encode_frame(&Frame::method(2, BASIC_QOS_OK), &mut out)?;
        socket.write_all(&out).await?;

        let mut reader = FrameReader::new(&mut socket);
        for _ in 0..3 {
            let frame = reader.read_frame().await?;
            eprintln!(
                "[broker] received {} frame on channel {} ({} bytes)",
                frame.frame_type,
                frame.channel,
                frame.payload.len()
            );
        }
        // Dropping the socket ends the connection from the broker's side.
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
    });

    let endpoint = Endpoint::new("127.0.0.1", port).with_family(FamilyPreference::Ipv4Only);
    let connection =
        Connection::connect(endpoint, TransportConfig::default(), ConnectionConfig::default())
            .await?;

    let content = connection.open_session(
        1,
        ChannelKind::content(Arc::new(MethodIdClassifier::basic())),
        Arc::new(|session: &Session, command: Command| -> amqpwire::session::Result<()> {
            eprintln!(
                "[client] channel {} got {:?} with body {:?}",
                session.channel(),
                command.method_id(),
                String::from_utf8_lossy(&command.body())
            );
            Ok(())
        }),
    )?;
    let control = connection.open_session(
        2,
        ChannelKind::method(),
        Arc::new(|session: &Session, command: Command| -> amqpwire::session::Result<()> {
            eprintln!("[client] channel {} got {:?}", session.channel(), command.method_id());
            Ok(())
        }),
    )?;

    for session in [&content, &control] {
        let channel = session.channel();
        session.add_shutdown_listener(move |reason| {
            eprintln!("[client] channel {channel} closed: {reason}");
        });
    }

    let reader = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.run_reader().await })
    };

    let publish = Command::content(
        1,
        BASIC_PUBLISH,
        content_header(5),
        &b"howdy"[..],
        connection.frame_max(),
    );
    content.transmit(&publish).await?;

    let reason = reader.await?;
    eprintln!("[client] connection closed: {reason}");
    broker.await??;

    // The session is closed now: ordinary commands are refused.
    if let Err(err) = content.transmit(&publish).await {
        eprintln!("[client] transmit after close: {err}");
    }
    eprintln!("[client] sessions left: {}", connection.session_count());
    Ok(())
}
