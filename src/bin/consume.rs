use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    featurestream::apps::run_consumer(std::env::args().skip(1))
}
