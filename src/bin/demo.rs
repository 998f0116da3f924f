//! Minimal runnable demonstration of the store's public API. Formatting
//! and argument parsing live here, outside the core crate.

use recordstore::RecordStore;

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| "demo.db".to_string());
    let mut store = RecordStore::open(&path).expect("open store");

    for n in 1..=5 {
        let id = store
            .insert_record(&format!("Etudiant {}", n))
            .expect("insert record");
        println!("inserted record {}", id);
    }

    for page in 0..store.page_count().expect("page count") {
        let records = store.get_page(page).expect("get page");
        println!("page {}: {:?}", page, records);
    }

    store.close().expect("close store");
}
