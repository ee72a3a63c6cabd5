use parse_server_http::{Delivery, ExecutionOptions, ParseClient, ParseFile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = ParseClient::from_env().map_err(anyhow::Error::msg)?;
    let url = std::env::var("PARSE_FILE_URL")?;
    let file = ParseFile {
        name: url.rsplit('/').next().unwrap_or_default().to_owned(),
        url,
    };

    let mut execution = client.download_file(
        &file,
        ExecutionOptions::default().with_intermediate_responses(true),
    );
    while let Some(delivery) = execution.next().await {
        match delivery {
            Delivery::Intermediate(progress) => match progress.expected {
                Some(expected) => println!(
                    "attempt {}: {}/{} bytes",
                    progress.attempt, progress.transferred, expected
                ),
                None => println!(
                    "attempt {}: {} bytes",
                    progress.attempt, progress.transferred
                ),
            },
            Delivery::Terminal(result) => {
                let bytes = result?;
                println!("downloaded {} ({} bytes)", file.name, bytes.len());
            }
        }
    }

    Ok(())
}
