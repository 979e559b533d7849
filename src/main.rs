fn main() {
    kafka_observer::process::main(kafka_observer::run)
}
