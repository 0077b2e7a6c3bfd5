use clap::{App, Arg, SubCommand};
#[macro_use]
extern crate log;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::io::Write;
use xlhmm::density::{TruncatedGamma, ZeroTruncatedBinomial};
use xlhmm::gen_obs::{simulate, SimulationProfile};
use xlhmm::*;

fn common_args(app: App<'static, 'static>) -> App<'static, 'static> {
    app.arg(
        Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Debug mode"),
    )
    .arg(
        Arg::with_name("seed")
            .long("seed")
            .takes_value(true)
            .default_value("32389")
            .help("Seed"),
    )
    .arg(
        Arg::with_name("intervals")
            .long("intervals")
            .takes_value(true)
            .default_value("20")
            .help("Number of simulated intervals."),
    )
    .arg(
        Arg::with_name("length")
            .long("length")
            .takes_value(true)
            .default_value("500")
            .help("Length of each simulated interval."),
    )
    .arg(
        Arg::with_name("threads")
            .long("threads")
            .short("t")
            .takes_value(true)
            .default_value("1")
            .help("Number of threads"),
    )
}

fn subcommand_simulate() -> App<'static, 'static> {
    let app = SubCommand::with_name("simulate")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Simulate observations from the default profile. Write JSON to stdout.");
    common_args(app)
}

fn subcommand_fit() -> App<'static, 'static> {
    let app = SubCommand::with_name("fit")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Fit the coverage model, then the count model, and decode. Write TSV to stdout.")
        .arg(
            Arg::with_name("observations")
                .long("observations")
                .short("o")
                .value_name("JSON")
                .takes_value(true)
                .help("Observations. JSON format. If not supplied, simulate them."),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("JSON")
                .takes_value(true)
                .help("Fitting parameters. JSON format."),
        )
        .arg(
            Arg::with_name("max_distance")
                .long("max_distance")
                .takes_value(true)
                .default_value("5")
                .help("Maximum gap between crosslink sites merged into a region."),
        )
        .arg(
            Arg::with_name("regions")
                .long("regions")
                .help("Output regions instead of sites."),
        );
    common_args(app)
}

fn parse<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> Result<T> {
    matches
        .value_of(name)
        .and_then(|e| e.parse().ok())
        .ok_or_else(|| FitError::Config(format!("invalid value for --{}", name)))
}

fn simulated(matches: &clap::ArgMatches) -> Result<(ObservationSet, Paths)> {
    let seed: u64 = parse(matches, "seed")?;
    let intervals: usize = parse(matches, "intervals")?;
    let length: usize = parse(matches, "length")?;
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
    simulate(&mut rng, &SimulationProfile::default(), intervals, length)
}

fn simulate_obs(matches: &clap::ArgMatches) -> Result<()> {
    let (obs, _) = simulated(matches)?;
    let stdout = std::io::stdout();
    let mut wtr = std::io::BufWriter::new(stdout.lock());
    serde_json::to_writer(&mut wtr, &obs)?;
    writeln!(&mut wtr)?;
    Ok(())
}

fn fit(matches: &clap::ArgMatches) -> Result<()> {
    let (obs, truth) = match matches.value_of("observations") {
        Some(path) => {
            let rdr = std::fs::File::open(path).map(std::io::BufReader::new)?;
            (serde_json::from_reader(rdr)?, None)
        }
        None => {
            let (obs, truth) = simulated(matches)?;
            (obs, Some(truth))
        }
    };
    let config = match matches.value_of("config") {
        Some(path) => FitConfig::from_json(path)?,
        None => FitConfig::default(),
    };
    let max_distance: usize = parse(matches, "max_distance")?;
    let intervals: usize = Strand::BOTH.iter().map(|&s| obs.strand(s).len()).sum();
    debug!("{} positions, {} intervals.", obs.num_positions(), intervals);
    let mut model: PlainModel = EmissionModel::new(
        TruncatedGamma::new(1.0, 0.5, 0.05),
        TruncatedGamma::new(2.0, 2.0, 0.05),
        ZeroTruncatedBinomial::new(0.05),
        ZeroTruncatedBinomial::new(0.5),
    );
    let mut hmm = CrosslinkHmm::new(&obs, &config);
    let coverage = hmm.baum_welch(&mut model, LearnMode::Coverage, &config)?;
    info!("Coverage\t{:?}", coverage);
    let counts = hmm.baum_welch(&mut model, LearnMode::Counts, &config)?;
    info!("Counts\t{:?}", counts);
    hmm.apply_parameters(&model, &config)?;
    info!("Model:\n{}", model);
    info!("Transition:\n{}", hmm);
    let (paths, lk) = hmm.viterbi_log();
    debug!("Viterbi log-likelihood\t{:.3}", lk);
    if let Some(truth) = truth {
        let (agree, total) = paths
            .iter()
            .zip(truth.iter())
            .flat_map(|(xs, ys)| xs.iter().zip(ys.iter()))
            .flat_map(|(xs, ys)| xs.iter().zip(ys.iter()))
            .fold((0, 0), |(agree, total), (x, y)| {
                (agree + (x == y) as usize, total + 1)
            });
        info!("Agreement with the simulated states\t{}/{}", agree, total);
    }
    let calls = report::position_calls(&hmm, &paths);
    let stdout = std::io::stdout();
    let mut wtr = std::io::BufWriter::new(stdout.lock());
    if matches.is_present("regions") {
        for region in report::merge_regions(&calls, max_distance) {
            writeln!(
                &mut wtr,
                "{}\t{}\t{}\t{}\t{}\t{:.3}",
                region.strand, region.interval, region.start, region.end, region.sites, region.score
            )?;
        }
    } else {
        for site in report::crosslink_sites(&calls) {
            let posteriors: Vec<_> = site.posteriors.iter().map(|x| format!("{:.3}", x)).collect();
            writeln!(
                &mut wtr,
                "{}\t{}\t{}\t{:.3}\t{:.3}\t{}",
                site.strand,
                site.interval,
                site.position,
                site.score,
                site.enrichment,
                posteriors.join("\t")
            )?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let matches = App::new("fit_model")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Crosslink site HMM. Simulate:->[JSON] or Fit:[JSON]->[TSV]")
        .setting(clap::AppSettings::ArgRequiredElseHelp)
        .subcommand(subcommand_simulate())
        .subcommand(subcommand_fit())
        .get_matches();
    if let Some(sub_m) = matches.subcommand().1 {
        let level = match sub_m.occurrences_of("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
        let threads: usize = parse(sub_m, "threads")?;
        if let Err(why) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            debug!("{:?}", why);
        }
    }
    debug!("Start");
    match matches.subcommand() {
        ("simulate", Some(sub_m)) => simulate_obs(sub_m),
        ("fit", Some(sub_m)) => fit(sub_m),
        _ => Ok(()),
    }
}
