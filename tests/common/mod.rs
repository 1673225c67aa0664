//! Scripted fake control board on a loopback TCP socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Commands the fake board has received, in order.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// A well-formed reply frame.
pub fn reply(text: &str) -> Vec<String> {
    vec![format!("{text}\r\n>>> ")]
}

/// Board with substrates H and A attached.
pub fn standard_board(cmd: &str) -> Vec<String> {
    match cmd {
        "v" => reply("Firmware version 1.4.2"),
        "cH" | "cA" => reply("MUX OK"),
        c if c.starts_with('c') => reply(""),
        "dH" => reply("Board H adapter resistor is 1000"),
        "dA" => reply("Board A adapter resistor is 220"),
        c if c.starts_with("ADC") => reply("AIN 42"),
        c if c.starts_with('s') => reply(""),
        _ => reply("?"),
    }
}

/// Start a fake board. `respond` returns the chunks to write back for each
/// command; chunks are written separately with a short pause in between. An
/// empty list means the board stays silent.
pub async fn spawn_board<F>(respond: F) -> (SocketAddr, CommandLog)
where
    F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let server_log = log.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = server_log.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                loop {
                    let mut raw = Vec::new();
                    match reader.read_until(b'\r', &mut raw).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let command = String::from_utf8_lossy(&raw)
                        .trim_end_matches('\r')
                        .to_string();
                    log.lock().unwrap().push(command.clone());

                    for chunk in (*respond)(&command) {
                        if reader.get_mut().write_all(chunk.as_bytes()).await.is_err() {
                            return;
                        }
                        let _ = reader.get_mut().flush().await;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            });
        }
    });

    (addr, log)
}

pub fn commands(log: &CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}
