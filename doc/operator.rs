//=====================================================================================================================

Operator run order:

Every step is a separate `redpacket <subcommand>` invocation. Nothing is kept between runs except chain state and
the generated SQL file, so every step re-reads the contract flags it depends on.

    0> `add-admin --admin <ADDR>` with the owner key, then `deposit` to fund the packet.

    1> `register`
        - Read data/participants.csv (user_id, wallet_address; other columns ignored).
        - Per row: non-empty fields, positive integer user_id, valid address, no contract code at the address.
        - Default aborts on the first bad row; `--force` skips bad rows and failed chunks instead.
        - Refuse to start while drawInProgress() is true, checked before the first row is read.
        - One setParticipantsBatch per chunk of BATCH_SIZE (100), strictly in order, each awaited.
        Example: 250 rows, 3 bad addresses, --force => 247 accepted, chunks of 100, 100, 47.

    2> `request-draw [--max-fee-wei N]`
        - Refuse while drawInProgress() is true, or when the VRF wrapper has no code.
        - Abort when the quoted price is above the ceiling; equal is fine.

    3> wait for the VRF callback, `status` shows the live state.
        - If the callback never arrives: `emergency-fulfill [--random-word N]` (default: unix time).

    4> `distribute` once randomReady() is true.

    5> `export [--from-block N] [--to-block N]`
        - One eth_getLogs over the range for Allocation events, split the range yourself if the node limits it.
        - Sum amounts per address whether or not `success` is set, count success/failed separately.
        - Write data/update_allocations.sql, one overwrite UPDATE per address, sorted by address.

    6> `balances [--csv FILE] [--output FILE]`
        - eth_getBalance for every wallet_address in the roster.
        - Write lottery_balance (ETH) and lottery_status = Finished back, other columns untouched.
        - Rows without a readable address stay as they were and are counted as failed.
