use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::path::Path;

/// Returns the last `lines` lines of the file at `path`, or `None` if it does not exist.
pub fn tail(path: &Path, lines: usize) -> io::Result<Option<Vec<String>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut buffer: VecDeque<String> = VecDeque::with_capacity(lines);
    if lines == 0 {
        return Ok(Some(Vec::new()));
    }

    for line in BufReader::new(file).lines().map_while(Result::ok) {
        if buffer.len() == lines {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    Ok(Some(buffer.into()))
}

/// Prints the last `lines` lines of the background server's output.
pub fn show_logs(path: &Path, lines: usize) -> io::Result<()> {
    match tail(path, lines)? {
        Some(tail) => {
            for line in tail {
                println!("{}", line);
            }
        }
        None => {
            eprintln!(
                "No server log at {}; start the server with `testbed test_server_bg` first.",
                path.display()
            );
        }
    }

    Ok(())
}
