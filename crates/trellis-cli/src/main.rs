//! Trellis command line.
//!
//! # Usage
//!
//! ```bash
//! # Generate an identity on Curve25519
//! trellis keygen --server https://example.org
//!
//! # Sign and verify with the printed keys
//! trellis sign --key <private-key-hex> --message hello
//! trellis verify --public <public-key-hex> --message hello --signature <hex>
//!
//! # Run a mutual scan between multi-device users over a hostile network
//! trellis simulate --protocol mutual-scan --seed 7 --alice-devices 2 --bob-devices 3 --hostile
//! ```

use std::io::{self, Write};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use trellis_core::{EnvRng, OwnedIdentity, SystemEnv};
use trellis_crypto::{CurveId, PrivateKey, PublicKey, Signature, signature};
use trellis_harness::{NetworkFaults, SimWorld};
use trellis_proto::Encoded;

/// Trellis protocol tools
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Trellis keys, signatures and protocol simulation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an identity and print its keys
    Keygen {
        /// Identity server URL
        #[arg(short, long)]
        server: String,

        /// Curve to generate keys on
        #[arg(short, long, value_enum, default_value_t = CurveArg::Curve25519)]
        curve: CurveArg,
    },

    /// Sign a message with an encoded private key
    Sign {
        /// Encoded private key, hex
        #[arg(short, long)]
        key: String,

        /// Message to sign
        #[arg(short, long)]
        message: String,
    },

    /// Verify a signature against a compact public key
    Verify {
        /// Compact public key, hex
        #[arg(short, long)]
        public: String,

        /// Signed message
        #[arg(short, long)]
        message: String,

        /// Signature, hex
        #[arg(short, long)]
        signature: String,
    },

    /// Run a protocol between two simulated users
    Simulate {
        /// Protocol to run
        #[arg(short, long, value_enum, default_value_t = ProtocolArg::MutualScan)]
        protocol: ProtocolArg,

        /// Simulation seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Devices owned by Alice
        #[arg(long, default_value = "1")]
        alice_devices: usize,

        /// Devices owned by Bob
        #[arg(long, default_value = "1")]
        bob_devices: usize,

        /// Duplicate and reorder packets
        #[arg(long)]
        hostile: bool,

        /// Delivery budget before giving up
        #[arg(long, default_value = "10000")]
        max_deliveries: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CurveArg {
    Mdc,
    Curve25519,
}

impl From<CurveArg> for CurveId {
    fn from(curve: CurveArg) -> Self {
        match curve {
            CurveArg::Mdc => Self::Mdc,
            CurveArg::Curve25519 => Self::Curve25519,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    MutualScan,
    ContactDeletion,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let mut out = io::stdout().lock();
    match args.command {
        Command::Keygen { server, curve } => keygen(&mut out, server, curve.into()),
        Command::Sign { key, message } => sign(&mut out, &key, &message),
        Command::Verify { public, message, signature } => {
            verify(&mut out, &public, &message, &signature)
        },
        Command::Simulate {
            protocol,
            seed,
            alice_devices,
            bob_devices,
            hostile,
            max_deliveries,
        } => {
            let faults = if hostile { NetworkFaults::HOSTILE } else { NetworkFaults::NONE };
            simulate(&mut out, protocol, seed, alice_devices, bob_devices, faults, max_deliveries)
        },
    }
}

fn keygen(
    out: &mut impl Write,
    server: String,
    curve: CurveId,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = EnvRng::new(SystemEnv::new());
    let owned = OwnedIdentity::generate(server, curve, &mut rng)?;
    tracing::info!(identity = %owned.identity, %curve, "generated identity");

    writeln!(out, "identity:        {}", hex::encode(owned.identity.as_bytes()))?;
    writeln!(
        out,
        "signing key:     {}",
        hex::encode(owned.signing.private.to_encoded().to_bytes()?)
    )?;
    writeln!(out, "signing public:  {}", hex::encode(owned.signing.public.to_compact_bytes()))?;
    writeln!(
        out,
        "encryption key:  {}",
        hex::encode(owned.encryption.private.to_encoded().to_bytes()?)
    )?;
    writeln!(
        out,
        "encryption public: {}",
        hex::encode(owned.encryption.public.to_compact_bytes())
    )?;
    Ok(())
}

fn sign(out: &mut impl Write, key: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = PrivateKey::from_encoded(&Encoded::decode(&hex::decode(key)?)?)?;
    let mut rng = EnvRng::new(SystemEnv::new());
    let signature = signature::sign(&key, message.as_bytes(), &mut rng)?;

    writeln!(out, "{}", hex::encode(signature.as_bytes()))?;
    Ok(())
}

fn verify(
    out: &mut impl Write,
    public: &str,
    message: &str,
    signature: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = PublicKey::from_compact_bytes(&hex::decode(public)?)?;
    let signature = Signature::from_bytes(key.curve(), &hex::decode(signature)?)?;

    match signature::verify(&key, message.as_bytes(), &signature) {
        Ok(()) => {
            writeln!(out, "valid")?;
            Ok(())
        },
        Err(err) => {
            tracing::warn!(error = %err, "signature rejected");
            writeln!(out, "invalid")?;
            Err(err.into())
        },
    }
}

fn simulate(
    out: &mut impl Write,
    protocol: ProtocolArg,
    seed: u64,
    alice_devices: usize,
    bob_devices: usize,
    faults: NetworkFaults,
    max_deliveries: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut world = SimWorld::new(seed, faults);
    let alice = world.add_user("alice", alice_devices)?;
    let bob = world.add_user("bob", bob_devices)?;

    let started = match protocol {
        ProtocolArg::MutualScan => world.start_mutual_scan(alice, 0, bob)?,
        ProtocolArg::ContactDeletion => {
            world.connect(alice, bob)?;
            world.start_contact_deletion(alice, 0, bob)?
        },
    };
    tracing::info!(
        ?protocol,
        instance = ?started.instance,
        status = ?started.status,
        "protocol started"
    );

    let deliveries = world.run(max_deliveries)?;
    let stats = world.stats();
    writeln!(
        out,
        "deliveries: {deliveries} (accepted {}, rejected {}, duplicated {}, deferred {}, \
         cancelled {})",
        stats.delivered, stats.rejected, stats.duplicated, stats.deferred, stats.cancelled
    )?;

    for (name, user) in [("alice", alice), ("bob", bob)] {
        let identity = world.identity(user)?.clone();
        for device in 0..world.device_count(user)? {
            let backend = world.backend(user, device)?;
            let notifications = world.notifications(user, device)?;
            writeln!(
                out,
                "{name}#{device}: {} contact(s), {} notification(s), {} open instance(s)",
                backend.contacts(&identity).len(),
                notifications.len(),
                backend.instance_count()
            )?;
        }
    }
    Ok(())
}
