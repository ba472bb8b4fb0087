//! Demonstration of path-scoped re-rendering with a shopping cart.
//!
//! Run with `RUST_LOG=pathstore=debug` to see writes, notifications and
//! renders.

use pathstore::create_store;
use pathstore::runtime::Runtime;
use serde_json::{json, Value};

fn increment(v: &Value) -> Value {
    json!(v.as_i64().unwrap_or(0) + 1)
}

fn main() -> pathstore::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== Store Example: Cart ===\n");

    let runtime = Runtime::current();
    let (use_store, get_store) = create_store(json!({
        "cart": {"price": 0, "items": []},
        "username": "Hamza",
    }));

    println!("1. Mounting units");
    let username = runtime.mount("Username", {
        let use_store = use_store.clone();
        move || {
            let (name, _) = use_store.at("username").get();
            println!("   [Username] {}", name);
        }
    });
    let price = runtime.mount("CartPrice", {
        let use_store = use_store.clone();
        move || {
            let (price, _) = use_store.at("cart").at("price").get();
            println!("   [CartPrice] {}", price);
        }
    });
    let items = runtime.mount("CartItems", {
        let use_store = use_store.clone();
        move || {
            let (items, _) = use_store.at("cart").at("items").get();
            let count = items.as_array().map_or(0, Vec::len);
            println!("   [CartItems] {} item(s)", count);
        }
    });
    let all = runtime.mount("AllStore", move || {
        let (state, _) = use_store.get();
        println!("   [AllStore] {}", state);
    });

    println!("\n2. Incrementing the price (Username and CartItems stay put)");
    let (_, set_price) = get_store.at("cart").at("price").get();
    runtime.batch(|| set_price.update(increment))?;

    println!("\n3. Adding an item and renaming in one batch");
    runtime.batch(|| -> pathstore::Result<()> {
        get_store
            .at("cart")
            .at("items")
            .index(0)
            .setter()
            .set(json!({"sku": "tea", "qty": 2}))?;
        get_store.at("username").setter().set("HAMZA")?;
        Ok(())
    })?;

    println!("\n4. Render counts:");
    for unit in [&username, &price, &items, &all] {
        println!("   {}: {}", unit.name(), unit.render_count());
    }

    println!("\n✓ Example complete!");
    Ok(())
}
