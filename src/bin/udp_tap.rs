use std::{
    env, io,
    net::{Ipv4Addr, UdpSocket},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};
use tinystack::{
    protocol::ethernet::MAX_FRAME_LEN,
    stack::{Interface, InterfaceBuilder, RawTransport, TransportError},
};

const LISTEN_ADDR: &str = "0.0.0.0:19480";
const PEER_ADDR: &str = "127.0.0.1:19481";
const IDLE_SLEEP_MS: u64 = 5;

/// Ethernet frames carried one per UDP datagram.
struct UdpTap {
    socket: UdpSocket,
    pending: Option<Vec<u8>>,
}

impl UdpTap {
    fn new(listen: &str, peer: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        Ok(UdpTap {
            socket,
            pending: None,
        })
    }
}

impl RawTransport for UdpTap {
    fn frame_available(&mut self) -> bool {
        if self.pending.is_none() {
            let mut buf = vec![0u8; MAX_FRAME_LEN];
            match self.socket.recv(&mut buf) {
                Ok(len) => {
                    buf.truncate(len);
                    self.pending = Some(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => (),
                Err(e) => warn!("tap receive: {e}"),
            }
        }
        self.pending.is_some()
    }

    fn overflow_occurred(&mut self) -> bool {
        false
    }

    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.pending.take()?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Some(len)
    }

    fn transmit_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len: frame.len() });
        }
        self.socket
            .send(frame)
            .map(|_| ())
            .map_err(|e| TransportError::Device(e.to_string()))
    }

    fn link_is_up(&self) -> bool {
        true
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let listen = args.next().unwrap_or_else(|| LISTEN_ADDR.to_string());
    let peer = args.next().unwrap_or_else(|| PEER_ADDR.to_string());
    let tap = UdpTap::new(&listen, &peer).unwrap();
    info!("tunnelling frames between {listen} and {peer}");

    let mut interface = InterfaceBuilder::default().build(tap, Instant::now());

    // shell
    let (command_tx, command_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lines() {
            match line {
                Ok(line) => {
                    if command_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        while let Ok(line) = command_rx.try_recv() {
            run_command(&mut interface, &line);
        }
        if !interface.poll(Instant::now()) {
            thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
        }
        for publication in interface.take_publications() {
            println!(
                "{}: {}",
                publication.topic,
                String::from_utf8_lossy(&publication.payload)
            );
        }
    }
}

fn run_command<T: RawTransport>(interface: &mut Interface<T>, line: &str) {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (Some("show"), _) => {
            let ip = interface.ip_config();
            println!("mac     {}", interface.mac());
            println!("ip      {}/{}", ip.address, ip.netmask);
            println!("gateway {}", ip.gateway);
            println!("dns     {}", ip.dns);
            println!("dhcp    {:?}", interface.dhcp_state());
            println!("tcp     {:?}", interface.tcp_state());
            println!("output  {}", if interface.output() { "on" } else { "off" });
            println!("overrun {}", interface.overflow_count());
            Ok(())
        }
        (Some("ip"), Some(addr)) => set_ip(addr, |ip| interface.set_address(ip)),
        (Some("mask"), Some(addr)) => set_ip(addr, |ip| interface.set_netmask(ip)),
        (Some("gw"), Some(addr)) => set_ip(addr, |ip| interface.set_gateway(ip)),
        (Some("dns"), Some(addr)) => set_ip(addr, |ip| interface.set_dns(ip)),
        (Some("dhcp"), Some("on")) => interface.dhcp_enable(),
        (Some("dhcp"), Some("off")) => {
            interface.dhcp_disable();
            Ok(())
        }
        (Some("dhcp"), Some("refresh")) => interface.dhcp_refresh(),
        (Some("dhcp"), Some("decline")) => interface.dhcp_decline(),
        (Some("dhcp"), Some("release")) => interface.dhcp_release(),
        (Some("connect"), _) => interface.mqtt_connect(),
        (Some("sub"), Some(topic)) => interface.mqtt_subscribe(topic),
        (Some("unsub"), Some(topic)) => interface.mqtt_unsubscribe(topic),
        (Some("pub"), Some(topic)) => {
            let message = words.collect::<Vec<_>>().join(" ");
            interface.mqtt_publish(topic, message.as_bytes())
        }
        (Some("ping"), _) => interface.mqtt_ping(),
        (Some("disconnect"), _) => interface.mqtt_disconnect(),
        (None, _) => Ok(()),
        _ => {
            println!("unknown command `{line}`");
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("error: {e}");
    }
}

fn set_ip(
    addr: &str,
    set: impl FnOnce(Ipv4Addr),
) -> Result<(), tinystack::stack::CommandError> {
    match addr.parse() {
        Ok(ip) => set(ip),
        Err(_) => println!("bad address `{addr}`"),
    }
    Ok(())
}
