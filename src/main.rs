use std::fs::read_to_string;

use linebalance::Problem;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let path = std::env::args()
        .nth(1)
        .expect("Usage: <program> <input_file.yaml>");

    let buf = read_to_string(path)?;
    let problem: Problem = serde_yaml::from_str(&buf)?;
    let outcome = problem.solve()?;

    println!("{}", serde_yaml::to_string(&outcome)?);
    Ok(())
}
