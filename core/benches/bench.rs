//! Benchmarks of the S-P store.
//!
//! Supports sequential/strided/random read, write and mixed workloads,
//! against a software P chip or one driven through the hardware command codec.
//! Request count, block size, node cache size and concurrency are configurable.
//! Results are displayed as throughput in requests/sec plus the node cache hit rate.
use sp_store::*;

use self::benches::{AccessPattern, Bench, BenchBuilder, PChipType};
use self::util::{DisplayData, DisplayThroughput};

use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type Result<T> = core::result::Result<T, Error>;

fn main() {
    let requests = 1 << 14;
    // Specify all benchmarks
    let benches = vec![
        BenchBuilder::new("SoftPChip::read_seq")
            .p_chip_type(PChipType::Soft)
            .read_ratio(1.0)
            .pattern(AccessPattern::Seq)
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("SoftPChip::read_stride")
            .p_chip_type(PChipType::Soft)
            .read_ratio(1.0)
            .pattern(AccessPattern::Stride(97))
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("SoftPChip::read_rnd")
            .p_chip_type(PChipType::Soft)
            .read_ratio(1.0)
            .pattern(AccessPattern::Rnd)
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("SoftPChip::write_seq")
            .p_chip_type(PChipType::Soft)
            .read_ratio(0.0)
            .pattern(AccessPattern::Seq)
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("SoftPChip::write_rnd")
            .p_chip_type(PChipType::Soft)
            .read_ratio(0.0)
            .pattern(AccessPattern::Rnd)
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("SoftPChip::mixed_rnd")
            .p_chip_type(PChipType::Soft)
            .read_ratio(0.5)
            .pattern(AccessPattern::Rnd)
            .requests(requests)
            .concurrency(4)
            .build()
            .unwrap(),
        BenchBuilder::new("HardPChip::read_rnd")
            .p_chip_type(PChipType::Loopback)
            .read_ratio(1.0)
            .pattern(AccessPattern::Rnd)
            .requests(requests)
            .build()
            .unwrap(),
        BenchBuilder::new("HardPChip::write_rnd")
            .p_chip_type(PChipType::Loopback)
            .read_ratio(0.0)
            .pattern(AccessPattern::Rnd)
            .requests(requests)
            .build()
            .unwrap(),
    ];

    // Run all benchmarks and output the results
    run_benches(benches);
}

fn run_benches(benches: Vec<Box<dyn Bench>>) {
    println!("");

    let mut benched_count = 0;
    let mut failed_count = 0;
    for b in benches {
        print!("bench {} ... ", &b);

        let elapsed = match b.run() {
            Ok(elapsed) => elapsed,
            Err(e) => {
                failed_count += 1;
                println!("failed due to error {:?}", e);
                continue;
            }
        };

        let throughput = DisplayThroughput::new(b.requests(), elapsed);
        println!("{}", throughput);

        b.display_ext();
        benched_count += 1;
    }

    let bench_res = if failed_count == 0 { "ok" } else { "failed" };
    println!(
        "\nbench result: {}. {} benched; {} failed.",
        bench_res, benched_count, failed_count
    );
}

mod benches {
    use super::*;

    use std::fmt::{self};
    use std::thread;

    pub trait Bench: fmt::Display {
        /// Returns the name of the benchmark.
        fn name(&self) -> &str;

        /// Returns the total number of block requests.
        fn requests(&self) -> usize;

        /// Run the benchmark; returns the time spent serving requests,
        /// excluding store setup.
        fn run(&self) -> Result<Duration>;

        /// Display extra information.
        fn display_ext(&self) {}
    }

    pub struct BenchBuilder {
        name: String,
        p_chip_type: Option<PChipType>,
        pattern: Option<AccessPattern>,
        read_ratio: f64,
        config: StoreConfig,
        requests: usize,
        concurrency: u32,
    }

    impl BenchBuilder {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                p_chip_type: None,
                pattern: None,
                read_ratio: 1.0,
                config: StoreConfig::new().block_count(1 << 16).node_cache_size(256),
                requests: 1 << 12,
                concurrency: 1,
            }
        }

        pub fn p_chip_type(mut self, p_chip_type: PChipType) -> Self {
            self.p_chip_type = Some(p_chip_type);
            self
        }

        pub fn pattern(mut self, pattern: AccessPattern) -> Self {
            self.pattern = Some(pattern);
            self
        }

        pub fn read_ratio(mut self, read_ratio: f64) -> Self {
            self.read_ratio = read_ratio;
            self
        }

        pub fn config(mut self, config: StoreConfig) -> Self {
            self.config = config;
            self
        }

        pub fn requests(mut self, requests: usize) -> Self {
            self.requests = requests;
            self
        }

        pub fn concurrency(mut self, concurrency: u32) -> Self {
            self.concurrency = concurrency;
            self
        }

        pub fn build(self) -> Result<Box<dyn Bench>> {
            let Self {
                name,
                p_chip_type,
                pattern,
                read_ratio,
                config,
                requests,
                concurrency,
            } = self;

            let p_chip_type = match p_chip_type {
                Some(p_chip_type) => p_chip_type,
                None => return Err(Error::with_msg(Errno::InvalidArgs, "p_chip_type is not given")),
            };
            let pattern = match pattern {
                Some(pattern) => pattern,
                None => return Err(Error::with_msg(Errno::InvalidArgs, "pattern is not given")),
            };
            if !(0.0..=1.0).contains(&read_ratio) {
                return Err(Error::with_msg(
                    Errno::InvalidArgs,
                    "read_ratio must be within [0, 1]",
                ));
            }
            if requests == 0 {
                return Err(Error::with_msg(
                    Errno::InvalidArgs,
                    "requests must be greater than 0",
                ));
            }
            if concurrency == 0 {
                return Err(Error::with_msg(
                    Errno::InvalidArgs,
                    "concurrency must be greater than 0",
                ));
            }
            config.validate()?;

            Ok(Box::new(SpStoreBench {
                name,
                p_chip_type,
                pattern,
                read_ratio,
                config,
                requests,
                concurrency,
                metrics: Arc::new(HitRateMetrics::new()),
            }))
        }
    }

    pub struct SpStoreBench {
        name: String,
        p_chip_type: PChipType,
        pattern: AccessPattern,
        read_ratio: f64,
        config: StoreConfig,
        requests: usize,
        concurrency: u32,
        metrics: Arc<HitRateMetrics>,
    }

    impl Bench for SpStoreBench {
        fn name(&self) -> &str {
            &self.name
        }

        fn requests(&self) -> usize {
            self.requests
        }

        fn run(&self) -> Result<Duration> {
            let setup = StoreSetup::new(self.config)?.metrics(self.metrics.clone());
            match self.p_chip_type {
                PChipType::Soft => self.run_on(&setup.soft_controller()?),
                PChipType::Loopback => self.run_on(&setup.loopback_controller()?),
            }
        }

        fn display_ext(&self) {
            self.metrics.display();
        }
    }

    impl SpStoreBench {
        fn run_on<P: PChip, S: Store>(&self, controller: &Controller<P, S>) -> Result<Duration> {
            let start = Instant::now();
            let local_requests = self.requests / (self.concurrency as usize);
            let block_count = controller.block_count();
            let block_size = controller.block_size();

            thread::scope(|scope| {
                let join_handles: Vec<_> = (0..self.concurrency)
                    .map(|i| {
                        scope.spawn(move || -> Result<()> {
                            let session = open_session(controller)?;
                            let mut next_pos = (i as usize) * block_count / (self.concurrency as usize);
                            let data = vec![i as u8; block_size];
                            for _ in 0..local_requests {
                                let block_id = match self.pattern {
                                    AccessPattern::Seq => next_pos,
                                    AccessPattern::Stride(_) => next_pos,
                                    AccessPattern::Rnd => gen_rnd_pos(block_count),
                                };
                                next_pos = match self.pattern {
                                    AccessPattern::Stride(stride) => (next_pos + stride) % block_count,
                                    _ => (next_pos + 1) % block_count,
                                };
                                if gen_rnd_ratio() < self.read_ratio {
                                    session.read_block(block_id, &nonce())?;
                                } else {
                                    session.write_block(block_id, &data, &nonce())?;
                                }
                            }
                            session.close()
                        })
                    })
                    .collect();

                let mut any_error = None;
                for join_handle in join_handles {
                    let res = join_handle
                        .join()
                        .expect("couldn't join on the associated thread");
                    if let Err(e) = res {
                        println!("benchmark task error: {:?}", &e);
                        any_error = Some(e);
                    }
                }
                match any_error {
                    None => Ok(start.elapsed()),
                    Some(e) => Err(e),
                }
            })
        }
    }

    fn open_session<P: PChip, S: Store>(controller: &Controller<P, S>) -> Result<Session<'_, P, S>> {
        let encrypted_key = controller
            .endorsement_certificate()
            .public_key()?
            .encrypt(&HmacKey::random())?;
        controller.session(&encrypted_key)
    }

    /// A random position drawn from a fresh nonce.
    fn gen_rnd_pos(block_count: usize) -> BlockId {
        let mut rnd_pos_bytes = [0u8; 8];
        rnd_pos_bytes.copy_from_slice(&nonce()[..8]);
        BlockId::from_le_bytes(rnd_pos_bytes) % block_count
    }

    fn gen_rnd_ratio() -> f64 {
        (gen_rnd_pos(1 << 20) as f64) / ((1 << 20) as f64)
    }

    impl fmt::Display for SpStoreBench {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{} (requests = {}, block = {}, store = {}, node cache = {}, tasks = {})",
                self.name(),
                self.requests,
                DisplayData::new(self.config.block_size),
                DisplayData::new(self.config.block_size * self.config.block_count),
                self.config.node_cache_size,
                self.concurrency
            )
        }
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum PChipType {
        Soft,
        Loopback,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum AccessPattern {
        Seq,
        Stride(usize),
        Rnd,
    }
}

mod util {
    use std::fmt::{self};
    use std::time::Duration;

    const KiB: usize = 1024;
    const MiB: usize = 1024 * KiB;
    const GiB: usize = 1024 * MiB;

    /// Display the amount of data in the unit of GiB, MiB, KiB, or bytes.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DisplayData(usize);

    impl DisplayData {
        pub fn new(nbytes: usize) -> Self {
            Self(nbytes)
        }
    }

    impl fmt::Display for DisplayData {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            const UNIT_TABLE: [(&str, usize); 4] =
                [("GiB", GiB), ("MiB", MiB), ("KiB", KiB), ("bytes", 0)];
            let (unit_str, unit_val) = {
                let (unit_str, mut unit_val) = UNIT_TABLE
                    .iter()
                    .find(|(_, unit_val)| self.0 >= *unit_val)
                    .unwrap();
                if unit_val == 0 {
                    unit_val = 1;
                }
                (unit_str, unit_val)
            };
            let data_val_in_unit = (self.0 as f64) / (unit_val as f64);
            write!(f, "{:.1} {}", data_val_in_unit, unit_str)
        }
    }

    /// Display throughput in the unit of requests/s or K requests/s.
    #[derive(Copy, Clone, Debug, PartialEq)]
    pub struct DisplayThroughput(f64);

    impl DisplayThroughput {
        pub fn new(requests: usize, elapsed: Duration) -> Self {
            Self(requests as f64 / elapsed.as_secs_f64())
        }
    }

    impl fmt::Display for DisplayThroughput {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.0 >= 1000.0 {
                write!(f, "{:.2} K req/s", self.0 / 1000.0)
            } else {
                write!(f, "{:.2} req/s", self.0)
            }
        }
    }
}
