use request_pool::{
    logging::{self, LogConfig},
    result::PoolResult,
    RequestPool,
};
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;


/// Результат одного имитированного поиска; ошибка передается внутри payload
#[derive(Debug)]
struct Lookup {
    key: String,
    result: Result<String, String>,
}

fn lookup(key: String) -> Lookup {
    std::thread::sleep(Duration::from_millis(20));
    let result = if key.len() % 4 == 0 {
        Err(format!("upstream rejected '{key}'"))
    } else {
        Ok(key.to_uppercase())
    };
    Lookup { key, result }
}

async fn run(keys: Vec<String>) -> PoolResult<Vec<String>> {
    let (pool, completion) = RequestPool::new(
        &CancellationToken::new(),
        4,
        lookup,
        keys.len(),
        |lookup: &Lookup| {
            if let Err(reason) = &lookup.result {
                tracing::warn!(key = %lookup.key, %reason, "lookup failed");
            }
        },
    )?;

    for (id, key) in keys.into_iter().enumerate() {
        pool.add_request(id as u64, key).await?;
    }
    completion.await?;

    let report = pool.shutdown().await?;
    tracing::info!(
        responses = report.responses.len(),
        handled = report.metrics.handled,
        "lookups finished"
    );

    Ok(report
        .responses
        .into_iter()
        .filter_map(|response| response.payload.result.ok())
        .collect())
}

fn main() {
    logging::init(LogConfig::default().with_env_overrides());

    let rt = match Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    let keys: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta"]
        .iter()
        .map(|k| k.to_string())
        .collect();

    rt.block_on(async {
        let now = Instant::now();
        match run(keys).await {
            Ok(found) => println!("found {:?} in {:?}", found, now.elapsed()),
            Err(err) => {
                eprintln!("pool failed: {err}");
                std::process::exit(1);
            }
        }
    });
}
