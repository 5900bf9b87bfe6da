fn main() {
    painlog_lib::run()
}
