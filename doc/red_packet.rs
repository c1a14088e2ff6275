//=====================================================================================================================
Owner:

The owner (deployer key) calls 1 method on RedPacketVRF contract

// grant the admin role, guarded by onlyOwner
- function addAdmin(address admin) external
    - function owner() external view returns (address)
    - function isAdmin(address) external view returns (bool)


//=====================================================================================================================

Admin:

The admin (off-chain operator) calls 4 methods on RedPacketVRF contract, plus a plain transfer to fund it

// Registration: one call per chunk, parallel arrays of equal length
- function setParticipantsBatch(uint256[] employeeIds, address[] participants) external
    - reverts while drawInProgress() == true

// Draw: ask the VRF wrapper for randomness, paying in native token
- function requestDraw() external
    - function vrfWrapper() external view returns (address)
    - function callbackGasLimit() external view returns (uint32)
    - function numWords() external view returns (uint32)
    - VRFV2PlusWrapper.calculateRequestPriceNative(uint32 callbackGasLimit, uint32 numWords) returns (uint256)
    - emits DrawRequested(uint256 indexed requestId)

// Fallback when the VRF callback never arrives
- function emergencyFulfillRandomWords(uint256[] randomWords) external
    - requires drawInProgress() == true
    - sets lastRandomWord() and randomReady()

// Payout
- function distribute() external
    - requires randomReady() == true
    - emits Allocation(address indexed participant, uint256 amount, bool success) per participant
    - emits DrawCompleted(uint256 indexed requestId, uint256 totalAmount, uint256 participantCount)
