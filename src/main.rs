use std::process::ExitCode;

fn main() -> ExitCode {
    match facture_interne_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Erreur : {:#}", e);
            ExitCode::FAILURE
        }
    }
}
