use rs_chain_core::backend::{CacheBackend, MapBackend, SqliteBackend};
use rs_chain_core::config::ChainConfig;
use rs_chain_core::model::scorer::Scorer;
use rs_chain_core::model::selector::Selector;
use rs_chain_core::pack::{pack, unpack};
use rs_chain_core::{Chain, ChainError};

const LINES: [&str; 5] = [
    "the cat sat on the mat",
    "the dog sat on the log",
    "a cat and a dog met on the mat",
    "the mat was red",
    "the log was wet",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Engine settings: look at the last 2 words to pick the next one,
    // no score decay, and a fixed seed so every run prints the same lines
    let config = ChainConfig {
        look_size: 2,
        scorer: Scorer::no_adj(),
        selector: Selector::best_weighted(128),
        seed: Some(42),
    };

    // In-memory store, nothing is written to disk
    // 'MapBackend::open(path)' would load and save a snapshot instead
    let mut chain = Chain::from_config(MapBackend::new(), &config)?;

    // Learn each line, words are split on whitespace
    for line in LINES {
        let words: Vec<&str> = line.split_whitespace().collect();
        chain.insert(&words)?;
    }
    println!("Lines learned: {}", chain.state().count);
    println!("Snippets stored: {}", chain.backend().len());

    // Produce around a search word, at most 10 words
    // The chain grows to the right and to the left until a line boundary
    for search in ["cat", "log", "sat on"] {
        let search: Vec<&str> = search.split_whitespace().collect();
        println!("{:?} -> {}", search, chain.produce(&search, 10, 0)?.join(" "));
    }

    // An empty search starts from a random stored word
    // Character limits count word characters, not spaces
    for i in 0..3 {
        println!("Random line {}: {}", i + 1, chain.produce::<&str>(&[], 0, 30)?.join(" "));
    }

    // Unknown words produce nothing
    println!("Unknown word gives {:?}", chain.produce(&["zebra"], 10, 0)?);

    // Both limits at 0 is refused
    match chain.produce(&["cat"], 0, 0) {
        Ok(_) => println!("Should not happen"),
        Err(ChainError::NoLimit) => println!("A word or character limit is required"),
        Err(e) => return Err(e.into()),
    }

    // Same engine over SQLite, through the write-back cache
    // Writes stay in the cache until 'finalize' (or a prune) flushes them
    let backend = CacheBackend::new(SqliteBackend::open_in_memory()?);
    let mut chain = Chain::new(backend, Selector::best_always(), Scorer::count_adj(3), 1)?;
    for line in LINES {
        let words: Vec<&str> = line.split_whitespace().collect();
        chain.insert(&words)?;
    }
    println!("Pending writes: {}", chain.backend().pending());
    println!("Best line from 'dog': {}", chain.produce(&["dog"], 10, 0)?.join(" "));

    // Drop snippets whose score decayed to 0 (one point lost every 3 lines)
    chain.prune_backend()?;

    // Persist the state and get the backend back
    let backend = chain.finalize()?;
    println!("Rows in SQLite: {}", backend.inner().len()?);

    // Word sequences are stored packed: words joined by ',' with '\' escapes
    let packed = pack(&["hello,", "world"]);
    println!("Packed: {} -> {:?}", packed, unpack(&packed));

    Ok(())
}
