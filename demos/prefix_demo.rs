//! Small tour of the prefix operations: load a routing-table-like key
//! set, then answer prefix queries against it.

use hat_trie::Error;
use hat_trie::TrieMap;

fn main() -> Result<(), Error> {
    let mut routes: TrieMap<&'static str> = TrieMap::new();
    routes.insert("/", "root")?;
    routes.insert("/api", "api index")?;
    routes.insert("/api/users", "user list")?;
    routes.insert("/api/users/by-id", "user lookup")?;
    routes.insert("/api/orders", "order list")?;
    routes.insert("/static/css", "styles")?;
    routes.insert("/static/js", "scripts")?;

    println!("routes under /api:");
    for (path, handler) in routes.iter_prefix("/api") {
        println!("  {} -> {}", String::from_utf8_lossy(&path), handler);
    }

    for request in ["/api/users/by-id/42", "/static/js/app.js", "/favicon.ico"] {
        match routes.longest_prefix(request) {
            Some((path, handler)) => println!(
                "{} dispatches to {} ({})",
                request,
                String::from_utf8_lossy(&path),
                handler
            ),
            None => println!("{} has no matching route", request),
        }
    }

    let removed = routes.remove_prefix("/static");
    println!("retired {} static routes, {} left", removed, routes.len());

    Ok(())
}
