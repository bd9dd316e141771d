// src/main.rs

fn main() {
    ledbus_lib::run()
}
