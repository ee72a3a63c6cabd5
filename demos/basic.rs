use parse_server_http::{ExecutionOptions, ParseClient, Query};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = ParseClient::from_env().map_err(anyhow::Error::msg)?;
    let options = ExecutionOptions::default();

    let saved = client
        .create(
            "GameScore",
            &json!({ "score": 1337, "playerName": "Sean Plott" }),
            &options,
        )
        .await?;
    println!("created {} at {}", saved.object_id, saved.created_at);

    let scores: Vec<Value> = client
        .find(
            "GameScore",
            &Query::matching(json!({ "score": { "$gte": 1000 } }))
                .order(["-score"])
                .limit(10),
            &options,
        )
        .await?;
    for score in scores {
        println!("{score}");
    }

    let total = client.count("GameScore", &Query::all(), &options).await?;
    println!("{total} score(s) stored");

    Ok(())
}
