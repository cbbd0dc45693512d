use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use wpaent_core::SupplicantConfig;
use wpaent_net::eap::{EapPacket, EapType};
use wpaent_net::eap_tls::EapTlsFragment;
use wpaent_net::avp::{AvpIter, AVP_EAP_MESSAGE};
use wpaent_net::eapol::{EapolFrame, EapolType};
use wpaent_net::mschapv2;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a captured EAPOL frame given as hex, Ethernet header included
    Decode {
        #[clap(value_parser)]
        frame: String,
        /// The input is decrypted TTLS application data (a run of AVPs)
        #[clap(long)]
        avp: bool,
    },
    /// Compute the MSCHAPv2 NT response and expected authenticator response
    Mschapv2 {
        #[clap(long)]
        username: String,
        #[clap(long)]
        password: String,
        /// 16-byte authenticator challenge, hex
        #[clap(long)]
        auth_challenge: String,
        /// 16-byte peer challenge, hex
        #[clap(long)]
        peer_challenge: String,
    },
    /// Load and validate a supplicant configuration file
    CheckConfig {
        #[clap(value_parser)]
        path: PathBuf,
    },
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("invalid hex: {}", input))
}

fn parse_challenge(input: &str) -> Result<[u8; mschapv2::CHALLENGE_LENGTH]> {
    parse_hex(input)?
        .try_into()
        .map_err(|v: Vec<u8>| anyhow!("challenge must be 16 bytes, got {}", v.len()))
}

fn mac(addr: &[u8; 6]) -> String {
    addr.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn describe_frame(bytes: &[u8]) -> Result<String> {
    let frame = EapolFrame::parse(bytes).map_err(|e| anyhow!("not an EAPOL frame: {}", e))?;
    let mut out = String::new();
    writeln!(out, "{} -> {}", mac(&frame.source), mac(&frame.destination))?;
    writeln!(
        out,
        "EAPOL v{} {:?}, {} byte body",
        frame.eapol.version, frame.eapol.packet_type, frame.eapol.length
    )?;
    if frame.eapol.packet_type != EapolType::Eap {
        return Ok(out);
    }

    describe_eap(&mut out, frame.eapol.payload, "")?;
    Ok(out)
}

fn describe_eap(out: &mut String, bytes: &[u8], indent: &str) -> Result<()> {
    let eap = EapPacket::from_bytes(bytes).map_err(|e| anyhow!("EAP: {}", e))?;
    write!(out, "{}EAP {:?} id={}", indent, eap.code, eap.identifier)?;
    let Some(type_byte) = eap.type_byte() else {
        writeln!(out)?;
        return Ok(());
    };
    match eap.eap_type() {
        Some(eap_type) => writeln!(out, " type={:?}", eap_type)?,
        None => writeln!(out, " type={}", type_byte)?,
    }

    match eap.eap_type() {
        Some(EapType::Tls | EapType::Peap | EapType::Ttls) => {
            let tls = EapTlsFragment::parse(eap.type_data())
                .map_err(|e| anyhow!("EAP-TLS: {}", e))?;
            writeln!(
                out,
                "{}  flags L={} M={} S={} version={}",
                indent,
                tls.flags.length_included() as u8,
                tls.flags.more_fragments() as u8,
                tls.flags.start() as u8,
                tls.flags.version()
            )?;
            if let Some(length) = tls.message_length {
                writeln!(out, "{}  TLS message length {}", indent, length)?;
            }
            writeln!(out, "{}  {} byte(s) of TLS data", indent, tls.data.len())?;
        }
        Some(EapType::Identity | EapType::Notification) => {
            writeln!(out, "{}  {:?}", indent, String::from_utf8_lossy(eap.type_data()))?;
        }
        Some(EapType::Nak) => {
            writeln!(out, "{}  desired types {:?}", indent, eap.type_data())?;
        }
        _ => writeln!(out, "{}  {}", indent, hex::encode(eap.type_data()))?,
    }
    Ok(())
}

/// Lists the AVPs of a decrypted TTLS record, decoding EAP-Message payloads.
fn describe_avps(bytes: &[u8]) -> Result<String> {
    let mut out = String::new();
    for avp in AvpIter::new(bytes) {
        let avp = avp.map_err(|e| anyhow!("AVP: {}", e))?;
        write!(out, "AVP code={} flags={:#04x}", avp.code, avp.flags)?;
        if let Some(vendor) = avp.vendor_id {
            write!(out, " vendor={}", vendor)?;
        }
        writeln!(out, " {} byte(s)", avp.data.len())?;
        if avp.code == AVP_EAP_MESSAGE && !avp.is_vendor() {
            describe_eap(&mut out, avp.data, "  ")?;
        }
    }
    Ok(out)
}

fn describe_config(config: &SupplicantConfig) -> String {
    let mut lines = vec![
        format!("interface      {}", config.interface),
        format!("method         {:?}", config.method),
        format!("security       {:?}", config.security),
        format!(
            "fragment       {} bytes per EAP-TLS fragment",
            config.fragment_budget()
        ),
        format!(
            "timeouts       identity {}s, attempt {}s, handshake {}s",
            config.identity_timeout_secs, config.attempt_timeout_secs, config.handshake_timeout_secs
        ),
    ];
    if config.method.is_tunneled() {
        let phase2 = format!("phase2         {:?} as {}", config.phase2, config.inner_identity());
        lines.insert(2, phase2);
    }
    if let Some(bssid) = config.peer_bssid() {
        lines.push(format!("peer bssid     {}", mac(&bssid)));
    }
    lines.join("\n")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Decode { frame, avp } => {
            let bytes = parse_hex(frame)?;
            let text = if *avp {
                describe_avps(&bytes)?
            } else {
                describe_frame(&bytes)?
            };
            print!("{}", text);
        }
        Commands::Mschapv2 {
            username,
            password,
            auth_challenge,
            peer_challenge,
        } => {
            let auth = parse_challenge(auth_challenge)?;
            let peer = parse_challenge(peer_challenge)?;
            let user = mschapv2::strip_domain(username);
            let nt = mschapv2::generate_nt_response(&auth, &peer, user, password);
            let expected =
                mschapv2::generate_authenticator_response(password, &nt, &peer, &auth, user);
            println!(
                "ChallengeHash          {}",
                hex::encode(mschapv2::challenge_hash(&peer, &auth, user))
            );
            println!(
                "PasswordHash           {}",
                hex::encode(mschapv2::nt_password_hash(password))
            );
            println!("NT-Response            {}", hex::encode(nt));
            println!(
                "Authenticator-Response {}",
                String::from_utf8_lossy(&expected)
            );
        }
        Commands::CheckConfig { path } => {
            let config = SupplicantConfig::load(path)
                .with_context(|| format!("{} is not a usable configuration", path.display()))?;
            println!("{}", describe_config(&config));
        }
    }
    Ok(())
}
