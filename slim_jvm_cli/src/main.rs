use log::error;
use slim_jvm::interpreter::Interpreter;
use slim_jvm::vm_error::MethodCallError;
use std::process::exit;

fn print_usage() {
    eprintln!("usage: slim_jvm [classpath-dir-or-jar ...] <class-file>");
    eprintln!("runs the main method of the given class file");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (class_file, class_paths) = match args.split_last() {
        Some(split) => split,
        None => {
            print_usage();
            exit(64);
        }
    };

    let mut interpreter = Interpreter::new();
    for class_path in class_paths {
        if let Err(e) = interpreter.class_loader_mut().add_path(class_path) {
            error!("cannot use class path {}: {}", class_path, e);
            exit(1);
        }
    }

    match interpreter.execute_file(class_file) {
        Ok(_) => {}
        Err(MethodCallError::ExceptionThrown(value)) => {
            error!("uncaught exception: {:?}", value);
            exit(1);
        }
        Err(MethodCallError::InternalError(e)) => {
            error!("execution failed: {}", e);
            exit(1);
        }
    }
}
