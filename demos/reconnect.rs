//! Reconnect demo - surviving transport loss with session resumption.
//!
//! This example demonstrates:
//! - Registering a session under a shared token with `SessionManager`
//! - Losing a frame in flight and retaining it in the replay cache
//! - Resuming over a fresh transport with `initiate_resume` and
//!   `resume_from_record`
//! - Observing lifecycle changes through `SessionEvent`
//!
//! Both peers live in this process: the client is a plain [`Session`],
//! the server side is owned by a [`SessionManager`]. Frames travel over
//! `ChannelSink` pairs, and the "network" is the loop that moves them
//! from one side's receiver into the other side's `handle_frame`.
//!
//! # Running
//!
//! ```sh
//! cargo run --example reconnect
//! ```

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use resumux::sink::ChannelSink;
use resumux::{FrameKind, FrameRecord, Session, SessionManager, StreamAutomaton};

/// Automaton that prints every payload delivered to its stream.
struct PrintAutomaton {
    role: &'static str,
}

impl StreamAutomaton for PrintAutomaton {
    fn accept_frame(&mut self, frame: FrameRecord) -> resumux::Result<()> {
        println!(
            "  [{}] stream {} delivered {:?}",
            self.role,
            frame.stream_id,
            String::from_utf8_lossy(frame.payload())
        );
        Ok(())
    }

    fn on_cancelled(&mut self) {
        println!("  [{}] stream cancelled", self.role);
    }

    fn is_terminal(&self) -> bool {
        false
    }
}

/// Pull everything currently queued on a transport receiver.
fn drain(rx: &mut UnboundedReceiver<FrameRecord>) -> Vec<FrameRecord> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Both peers agree on the token out of band (in a real deployment it
    // travels in the connection setup frame)
    let token = resumux::ResumeToken::generate();
    println!("session token: {}", token);

    // Client peer
    let (client_sink, mut client_wire) = ChannelSink::channel();
    let mut client = Session::builder()
        .token(token.clone())
        .sink(client_sink)
        .build();
    let mut client_factory = |_: &FrameRecord| -> Box<dyn StreamAutomaton> {
        Box::new(PrintAutomaton { role: "client" })
    };

    // Server peer, managed so the resume window is enforced
    let (manager, mut events) = SessionManager::new();
    let (server_sink, mut server_wire) = ChannelSink::channel();
    let server_session = Session::builder()
        .token(token.clone())
        .sink(server_sink)
        .build();
    let (_, server) = manager.register_session(server_session).await;
    let mut server_factory = |_: &FrameRecord| -> Box<dyn StreamAutomaton> {
        Box::new(PrintAutomaton { role: "server" })
    };

    // The client opens stream 1 and sends three requests
    println!("\n--- connected: client sends three requests");
    client.register_stream(1, Box::new(PrintAutomaton { role: "client" }))?;
    client.send(FrameRecord::new(
        1,
        FrameKind::RequestStream,
        Bytes::from_static(b"req-1"),
    ))?;
    client.send(FrameRecord::new(
        1,
        FrameKind::Payload,
        Bytes::from_static(b"req-2"),
    ))?;
    client.send(FrameRecord::new(
        1,
        FrameKind::Payload,
        Bytes::from_static(b"req-3"),
    ))?;

    // The network delivers the first two; the third vanishes with the
    // dying transport
    let mut in_flight = drain(&mut client_wire);
    if let Some(lost) = in_flight.pop() {
        println!(
            "  [wire] dropping {:?} on the floor",
            String::from_utf8_lossy(lost.payload())
        );
    }
    {
        let mut guard = server.lock().await;
        for frame in in_flight {
            guard.handle_frame(frame, &mut server_factory)?;
        }
        // The server acknowledges what it received so far
        guard.send_keepalive(false)?;
    }
    for frame in drain(&mut server_wire) {
        client.handle_frame(frame, &mut client_factory)?;
    }
    println!(
        "  [client] {} unacknowledged frame(s) retained for replay",
        client.replay_gauge().entries()
    );

    // Transport dies on both ends
    println!("\n--- transport lost on both peers");
    client.on_transport_lost();
    manager.on_transport_lost(&token).await?;

    // The client reconnects and presents its token
    println!("\n--- client reconnects within the resume window");
    let (new_client_sink, mut new_client_wire) = ChannelSink::channel();
    client.initiate_resume(Box::new(new_client_sink))?;
    let resume_record = drain(&mut new_client_wire)
        .pop()
        .ok_or("resume handshake produced no frame")?;

    // The server validates positions and replays anything the client
    // missed (nothing here, the loss was client-to-server)
    let (new_server_sink, mut new_server_wire) = ChannelSink::channel();
    let replayed = manager
        .resume_from_record(&resume_record, Box::new(new_server_sink))
        .await?;
    println!("  [server] accepted resume, replayed {} frame(s)", replayed);
    if let Some(event) = events.recv().await {
        println!("  [manager] event: {:?}", event);
    }

    // RESUME_OK tells the client which position the server reached; the
    // client replays the rest
    for frame in drain(&mut new_server_wire) {
        client.handle_frame(frame, &mut client_factory)?;
    }
    let resent = drain(&mut new_client_wire);
    println!("  [client] replaying {} frame(s)", resent.len());
    {
        let mut guard = server.lock().await;
        for frame in resent {
            guard.handle_frame(frame, &mut server_factory)?;
        }
        println!("  [server] state after resume: {:?}", guard.state());
    }
    println!("  [client] state after resume: {:?}", client.state());

    // Wind the session down cleanly
    manager.close(&token).await?;
    if let Some(event) = events.recv().await {
        println!("\n--- closed: {:?}", event);
    }

    Ok(())
}
