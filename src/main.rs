fn main() -> Result<(), Box<dyn std::error::Error>> {
    turnwise::cli::main()
}
