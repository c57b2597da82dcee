use tracing::{info, warn};
use tracing_subscriber;

use actix::{Actor, Addr, Recipient};
use clap::{value_t, values_t, App, Arg};
use colored::Colorize;

use mesh_arbiter::agreement::ArbitrationStrategy;
use mesh_arbiter::node_id::{ids_to_string, NodeId};
use mesh_arbiter::settings::Settings;
use mesh_arbiter::sim::SimCluster;
use mesh_arbiter::view::{Evicted, GetMembers, Members, MembershipView};
use mesh_arbiter::{Error, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const DEADLINE: Duration = Duration::from_secs(30);

fn parse_link(link: &str) -> Result<(u32, u32)> {
    match link.split_once(':') {
        Some((a, b)) => {
            let a = a.trim().parse::<u32>().map_err(|_| Error::TryFromStringError)?;
            let b = b.trim().parse::<u32>().map_err(|_| Error::TryFromStringError)?;
            Ok((a, b))
        }
        None => Err(Error::TryFromStringError),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_level(false)
        .with_target(false)
        .without_time()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .init();

    let matches = App::new("mesh-sim")
        .version("0.1")
        .author("zero.fx labs ltd.")
        .about("Simulates failure agreement in an in-process cluster")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("CONFIG_FILE")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("nodes")
                .short("n")
                .long("nodes")
                .value_name("NODES")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("kill")
                .short("k")
                .long("kill")
                .value_name("HOST")
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("sever")
                .short("s")
                .long("sever")
                .value_name("HOST:HOST")
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .possible_values(&["matching", "matching-cardinality", "no-quarter"])
                .takes_value(true),
        )
        .get_matches();

    let kills = if matches.is_present("kill") {
        values_t!(matches.values_of("kill"), u32).unwrap_or_else(|e| e.exit())
    } else {
        vec![]
    };
    let links = if matches.is_present("sever") {
        values_t!(matches.values_of("sever"), String).unwrap_or_else(|e| e.exit())
    } else {
        vec![]
    };

    let settings = match matches.value_of("config") {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };
    let local = settings.self_id()?;
    let mut config = settings.arbiter_config();
    let membership: BTreeSet<NodeId> = if matches.is_present("nodes") {
        let nodes = value_t!(matches.value_of("nodes"), u32).unwrap_or_else(|e| e.exit());
        (1..=nodes).map(|host| NodeId::from_parts(host, 0)).collect()
    } else {
        settings.members()?
    };
    if let Some(strategy) = matches.value_of("strategy") {
        config.strategy = strategy.parse::<ArbitrationStrategy>()?;
    }

    let mut cluster = SimCluster::new(membership.iter().cloned(), config);
    for (initiator, txn_id) in membership.iter().zip(1i64..) {
        cluster.set_safe_txn_id(*initiator, txn_id * 100);
    }
    for link in links.iter() {
        let (a, b) = parse_link(link)?;
        cluster.sever(NodeId::from_parts(a, 0), NodeId::from_parts(b, 0));
    }
    for host in kills.iter() {
        let victims: Vec<NodeId> =
            membership.iter().filter(|id| id.host_id() == *host).cloned().collect();
        for id in victims.into_iter() {
            cluster.kill(id);
        }
    }
    info!(
        "{} {} nodes, strategy {}, survivors {}",
        "[mesh-sim]".magenta(),
        membership.len(),
        config.strategy,
        ids_to_string(&cluster.survivors())
    );

    let sys = actix::System::new();
    sys.block_on(async move {
        let views: BTreeMap<NodeId, Addr<MembershipView>> = cluster
            .survivors()
            .into_iter()
            .map(|id| (id, MembershipView::new(id, membership.clone()).start()))
            .collect();
        let recipients: BTreeMap<NodeId, Recipient<Evicted>> =
            views.iter().map(|(id, addr)| (*id, addr.clone().recipient())).collect();

        let results = tokio::task::spawn_blocking(move || {
            cluster.resolve_with(DEADLINE, |id| recipients.get(&id).cloned())
        })
        .await
        .map_err(|_| Error::JoinError)?;

        let requests = views.iter().map(|(_, addr)| addr.send(GetMembers));
        let members = futures::future::join_all(requests).await;
        for ((id, _), view) in views.iter().zip(members.into_iter()) {
            let Members { members, dropped_hosts, .. } = view?;
            if local.map_or(false, |local| local != *id) {
                continue;
            }
            match results.get(id) {
                Some(Ok(decision)) => info!(
                    "{} {} evicted {:?}, members {}, dropped hosts {:?}",
                    "[mesh-sim]".magenta(),
                    id,
                    decision,
                    ids_to_string(&members),
                    dropped_hosts
                ),
                Some(Err(err)) => {
                    warn!("{} {} did not resolve: {}", "[mesh-sim]".magenta(), id, err)
                }
                None => warn!("{} {} never ran", "[mesh-sim]".magenta(), id),
            }
        }
        Ok::<(), Error>(())
    })
}
