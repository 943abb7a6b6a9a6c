use serde_json::{Value, json};
use vitalwatch_core::{Clock, EntityId, StoreError, SystemClock, WindowReader, connect_store};

/// What part of an entity's data to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Readings,
    Anomalies,
    Channel(usize),
}

pub fn run(id: EntityId, store_url: &str, view: View) {
    let rt = super::runtime();
    let result = rt.block_on(async {
        let store = connect_store(store_url).await?;
        let reader = WindowReader::new(store);
        collect(&reader, id, view, SystemClock.now_secs()).await
    });

    match result {
        Ok(doc) => match serde_json::to_string_pretty(&doc) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Build the JSON document for one entity.
pub async fn collect(
    reader: &WindowReader,
    id: EntityId,
    view: View,
    now: i64,
) -> Result<Value, StoreError> {
    let stats = reader.window_stats(id).await?;
    let profile = reader.profile(id).await?;
    let mut doc = json!({
        "entity": id,
        "now": now,
        "profile": profile,
        "stats": stats,
    });

    let (field, body) = match view {
        View::Readings => ("readings", json!(reader.readings(id).await?)),
        View::Anomalies => ("anomalies", json!(reader.anomalies(id).await?)),
        View::Channel(ch) => {
            let series: Vec<Value> = reader
                .channel_series(id, ch)
                .await?
                .into_iter()
                .map(|(at, value)| json!({ "collected_at": at, "value": value }))
                .collect();
            doc["channel"] = json!(ch);
            ("series", Value::Array(series))
        }
    };
    doc[field] = body;
    Ok(doc)
}
