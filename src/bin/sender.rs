use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tether::demo::UdpAdapter;
use tether::{Config, Registry};

const TICK_PERIOD_MS: u64 = 50;

enum StdinEvent {
    Chunk(Vec<u8>),
    Eof,
}

fn spawn_stdin_reader() -> mpsc::Receiver<StdinEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(StdinEvent::Eof);
                    break;
                }
                Ok(n) => {
                    if tx.send(StdinEvent::Chunk(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let local: SocketAddr = args
        .next()
        .expect("usage: sender <local addr> <peer addr>")
        .parse()
        .expect("invalid local address");
    let peer: SocketAddr = args
        .next()
        .expect("usage: sender <local addr> <peer addr>")
        .parse()
        .expect("invalid peer address");

    let mut io = UdpAdapter::bind(local, peer).expect("failed to bind udp socket");
    let mut registry: Registry<UdpAdapter> = Registry::new();
    let config = Config {
        send_window: 4096,
        recv_window: 4096,
        rt_timeout_ms: 1000,
        tick_period_ms: TICK_PERIOD_MS as u32,
    };
    let conn = registry.init(config).expect("invalid config");

    let stdin_rx = spawn_stdin_reader();
    let mut stdout = std::io::stdout();

    'outer: loop {
        let mut saw_input = false;
        while let Ok(event) = stdin_rx.try_recv() {
            saw_input = true;
            match event {
                StdinEvent::Chunk(bytes) => io.feed_stdin(&bytes),
                StdinEvent::Eof => io.mark_stdin_eof(),
            }
        }
        if saw_input && registry.on_input_ready(conn, &mut io).is_err() {
            break 'outer;
        }

        while let Some(datagram) = io.recv_datagram() {
            if registry.on_datagram(conn, &mut io, &datagram).is_err() {
                break 'outer;
            }
        }

        registry.on_tick(&mut io);

        let out = io.take_stdout();
        if !out.is_empty() {
            stdout.write_all(&out).expect("failed to write stdout");
            stdout.flush().ok();
        }

        thread::sleep(Duration::from_millis(TICK_PERIOD_MS));
    }

    log::info!("connection closed, exiting");
}
